use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification carried from the engine up to the transport layer.
///
/// Every error surfaced by the indexing and query paths maps onto exactly one
/// kind; the HTTP boundary owns the table from kind to status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Storage could not be created or the initial fill failed. Startup aborts.
    BuildFatal,
    /// One drain/apply (or rebuild) cycle failed; the next tick retries.
    UpdateTransient,
    /// The caller sent a malformed or missing query.
    QueryInvalid,
    /// Executing a well-formed query failed inside the engine.
    QueryInternal,
    /// The admission cap was reached or the server is shutting down.
    AdmissionRejected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BuildFatal => "build_fatal",
            ErrorKind::UpdateTransient => "update_transient",
            ErrorKind::QueryInvalid => "invalid_request",
            ErrorKind::QueryInternal => "internal",
            ErrorKind::AdmissionRejected => "overloaded",
        }
    }

    /// Errors the caller caused and may be told about verbatim.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::QueryInvalid)
    }

    /// Errors where repeating the same request later may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::AdmissionRejected | ErrorKind::UpdateTransient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reading {path:?} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing {what} failed: {source}")]
    Yaml {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid model description: {0}")]
    InvalidModel(String),

    #[error("Invalid change event for {collection}/{id}: {reason}")]
    InvalidEvent {
        collection: String,
        id: u64,
        reason: String,
    },

    #[error("Change feed {op} on {path:?} failed: {source}")]
    Feed {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Change feed unavailable: {0}")]
    FeedUnavailable(String),
}

impl Error {
    /// Failures of the change-data transport rather than of the data itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Feed { .. } | Error::FeedUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
