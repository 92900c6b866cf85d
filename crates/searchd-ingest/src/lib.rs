#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Change ingestion: a bulk fill for the initial build and a non-blocking
//! drain of pending mutations for incremental updates.

pub mod jsonl;
pub mod memory;

use serde::{Deserialize, Serialize};

use searchd_core::{ChangeEvent, ChangeKind, Error, Result};

pub use jsonl::JsonlSource;
pub use memory::MemorySource;

/// Finite replay of the dataset as `added` events.
pub type Fill<'a> = Box<dyn Iterator<Item = Result<ChangeEvent>> + Send + 'a>;

/// Source of change events for the text index.
///
/// Events for one fully-qualified id are returned in arrival order. Sources do
/// not filter by collection.
pub trait ChangeSource: Send + Sync {
    /// Replays the whole dataset. Pending changes older than the replay are
    /// discarded.
    fn fill(&self) -> Result<Fill<'_>>;

    /// Returns whatever is pending without waiting; an empty batch when idle.
    fn drain(&self) -> Result<Vec<ChangeEvent>>;
}

/// Wire form of one change-log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub collection: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ChangeRecord {
    pub fn into_event(self) -> Result<ChangeEvent> {
        let payload = match self.payload {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(serde_json::to_vec(&value).map_err(|e| Error::InvalidEvent {
                collection: self.collection.clone(),
                id: self.id,
                reason: e.to_string(),
            })?),
        };
        ChangeEvent::new(self.kind, self.collection, self.id, payload)
    }
}
