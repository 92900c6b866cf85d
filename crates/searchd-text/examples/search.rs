use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use searchd_core::meta::load_collections;
use searchd_ingest::JsonlSource;
use searchd_text::{IndexOptions, QueryOptions, QueryServer, TextIndex};

// Build a throwaway index from a JSON-lines snapshot and run one query.
// Usage:
//   cargo run -p searchd-text --example search -- "your query" \
//     [--models models.yml] [--search search.yml] [--snapshot data/snapshot] [--meeting N]

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut question = String::new();
    let mut models: Option<PathBuf> = None;
    let mut search: Option<PathBuf> = None;
    let mut snapshot: Option<PathBuf> = None;
    let mut meeting: i64 = 0;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1).cloned().unwrap_or_else(|| {
                eprintln!("{} requires a value", args[i]);
                std::process::exit(2);
            })
        };
        match args[i].as_str() {
            "--models" => { models = Some(PathBuf::from(value(i))); i += 2; }
            "--search" => { search = Some(PathBuf::from(value(i))); i += 2; }
            "--snapshot" => { snapshot = Some(PathBuf::from(value(i))); i += 2; }
            "--meeting" => { meeting = value(i).parse().unwrap_or(0); i += 2; }
            s if s.starts_with('-') => {
                eprintln!("Unknown flag: {}", s);
                std::process::exit(2);
            }
            s => {
                if question.is_empty() { question = s.to_string(); }
                i += 1;
            }
        }
    }
    if question.is_empty() {
        eprintln!("Usage: cargo run -p searchd-text --example search -- <query> [--models FILE] [--search FILE] [--snapshot DIR] [--meeting N]");
        std::process::exit(1);
    }

    // Defaults resolve relative to the workspace root so you can run from anywhere.
    let ws_root = Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2).unwrap_or(Path::new("."));
    let models = models.unwrap_or_else(|| ws_root.join("dev_data/models.yml"));
    let search = search.or_else(|| Some(ws_root.join("dev_data/search.yml")).filter(|p| p.exists()));
    let snapshot = snapshot.unwrap_or_else(|| ws_root.join("dev_data/snapshot"));

    let collections = load_collections(&models, search.as_deref())?;
    let source = Arc::new(JsonlSource::new(&snapshot, snapshot.join("changes.jsonl")));
    let root = tempfile::tempdir()?;
    let index = Arc::new(TextIndex::open(collections, source, IndexOptions::new(root.path().join("index")))?);

    println!("searchd search\n==============");
    println!("Snapshot: {}", snapshot.display());
    println!("Query   : {} (meeting {})\n", question, meeting);

    let runtime = tokio::runtime::Runtime::new()?;
    let server = QueryServer::new(Arc::clone(&index), QueryOptions::default());
    let answers = runtime.block_on(server.query(&question, meeting))?;
    for (i, (fqid, answer)) in answers.iter().enumerate() {
        println!("{:>2}. score={:.3} id={}", i + 1, answer.score, fqid);
        for (field, words) in &answer.matched_words {
            println!("    {}: {}", field, words.join(", "));
        }
    }

    index.close()?;
    Ok(())
}
