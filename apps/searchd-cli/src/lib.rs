//! searchd-cli
//!
//! The `searchd` daemon (HTTP boundary over the query server) and the
//! `searchd-generate-filter` tool.

pub mod error;
pub mod restricter;
pub mod web;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber logging to stderr; `RUST_LOG` overrides
/// `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
