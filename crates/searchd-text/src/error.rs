use std::path::PathBuf;

use searchd_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("creating index storage {path:?} failed: {source}")]
    StorageCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("opening index at {path:?} failed: {source}")]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: tantivy::TantivyError,
    },

    #[error("removing index storage {path:?} failed: {source}")]
    StorageRemove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing batch to generation {generation} failed: {source}")]
    BatchWrite {
        generation: u64,
        #[source]
        source: tantivy::TantivyError,
    },

    #[error("filling index failed: {0}")]
    Fill(#[source] searchd_core::Error),

    #[error("draining changes failed: {0}")]
    Drain(#[source] searchd_core::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("query execution failed: {0}")]
    Execution(#[from] tantivy::TantivyError),

    #[error("reading postings failed: {0}")]
    Postings(#[source] std::io::Error),

    #[error("background task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("too many concurrent queries")]
    Overloaded,

    #[error("query server is shutting down")]
    ShuttingDown,

    #[error("text index is not serving")]
    NotServing,

    #[error("text index is closed")]
    Closed,

    #[error("text index is already built")]
    AlreadyBuilt,

    #[error("building index failed: {0}")]
    Build(#[source] Box<SearchError>),

    #[error("rebuilding index failed: {0}")]
    Rebuild(#[source] Box<SearchError>),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::StorageCreate { .. }
            | SearchError::StorageOpen { .. }
            | SearchError::StorageRemove { .. }
            | SearchError::Fill(_)
            | SearchError::AlreadyBuilt
            | SearchError::Build(_) => ErrorKind::BuildFatal,
            SearchError::BatchWrite { .. } | SearchError::Drain(_) | SearchError::Rebuild(_) => {
                ErrorKind::UpdateTransient
            }
            SearchError::InvalidQuery(_) => ErrorKind::QueryInvalid,
            SearchError::Execution(_)
            | SearchError::Postings(_)
            | SearchError::Worker(_)
            | SearchError::DeadlineExceeded => ErrorKind::QueryInternal,
            SearchError::Overloaded
            | SearchError::ShuttingDown
            | SearchError::NotServing
            | SearchError::Closed => ErrorKind::AdmissionRejected,
        }
    }

    /// Failures after which drained changes may be lost: transport errors
    /// while draining and batches that could not be committed. The index is
    /// rebuilt from a fresh fill.
    pub fn triggers_rebuild(&self) -> bool {
        match self {
            SearchError::Drain(e) => e.is_transport(),
            SearchError::BatchWrite { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
