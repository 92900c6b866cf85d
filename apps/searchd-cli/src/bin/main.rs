use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use searchd_cli::restricter::Restricter;
use searchd_cli::web::{self, AppState};
use searchd_core::config::{Settings, DEFAULT_CONFIG_FILE};
use searchd_core::expand_path;
use searchd_core::meta::load_collections;
use searchd_ingest::JsonlSource;
use searchd_text::{IndexOptions, QueryOptions, QueryServer, Refresher, TextIndex};

#[derive(Debug, Parser)]
#[command(name = "searchd")]
#[command(about = "Full-text search over a change feed", long_about = None)]
struct Args {
    /// Base configuration file.
    #[arg(short, long, env = "SEARCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Configuration overlay (`dev`, `prod` or `test`).
    #[arg(long, env = "RUST_ENV", default_value = "dev")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    searchd_cli::init_tracing("searchd=info,searchd_text=info,tower_http=info");
    let args = Args::parse();
    let settings = Settings::load_from(expand_path(&args.config), &args.env).context("loading configuration")?;
    run(settings).await
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let search_filter = Some(settings.models.search.clone()).filter(|p| !p.as_os_str().is_empty());
    let collections = load_collections(&settings.models.models, search_filter.as_deref())
        .with_context(|| format!("loading models from {}", settings.models.models.display()))?;
    tracing::info!(collections = collections.len(), "models loaded");

    let source = Arc::new(JsonlSource::new(&settings.feed.snapshot_dir, &settings.feed.changes_file));
    let options = IndexOptions::from(&settings.index);
    let index = tokio::task::spawn_blocking(move || TextIndex::open(collections, source, options))
        .await?
        .context("building text index")?;
    let index = Arc::new(index);

    let refresher = Refresher::new(Arc::clone(&index), &settings.index);
    let nudge = refresher.nudger();
    let cancel = CancellationToken::new();
    let refresh_task = tokio::spawn(refresher.run(cancel.clone()));

    let queries = Arc::new(QueryServer::new(Arc::clone(&index), QueryOptions::from(&settings)).with_refresh(nudge));
    let restricter = match &settings.restricter.url {
        Some(url) if !url.is_empty() => Some(Arc::new(Restricter::new(url.clone(), settings.web.query_timeout)?)),
        _ => None,
    };
    if let Some(restricter) = &restricter {
        tracing::info!(url = restricter.url(), "restricter enabled");
    }
    let app = web::router(AppState { queries: Arc::clone(&queries), restricter });

    let addr = settings.web.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");
    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    // Stop queries first, then ingestion, then release the index.
    queries.shutdown().await;
    cancel.cancel();
    if let Err(e) = refresh_task.await {
        tracing::warn!(error = %e, "refresh loop ended abnormally");
    }
    tokio::task::spawn_blocking(move || index.close()).await??;
    tracing::info!("searchd stopped");
    served.context("serving http")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "installing ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "installing SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
