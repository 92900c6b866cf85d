use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use searchd_core::meta::Models;

/// Writes a search filter covering string fields and `meeting_id` of every
/// collection in a models file.
#[derive(Debug, Parser)]
#[command(name = "searchd-generate-filter")]
struct Args {
    /// Models file to read.
    #[arg(default_value = "models.yml")]
    models: PathBuf,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    searchd_cli::init_tracing(if args.verbose { "trace" } else { "warn" });

    tracing::info!(models = %args.models.display(), "reading models");
    let models = Models::load(&args.models).with_context(|| format!("loading {}", args.models.display()))?;
    let yaml = models.default_filters().to_yaml()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(output = %path.display(), collections = models.len(), "filter written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(yaml.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}
