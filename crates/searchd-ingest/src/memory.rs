//! In-process change source holding the current state of every entity.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::debug;

use searchd_core::{Change, ChangeEvent, Error, Result};

use crate::{ChangeSource, Fill};

#[derive(Debug)]
struct State {
    entities: BTreeMap<(String, u64), Vec<u8>>,
    pending: Vec<ChangeEvent>,
    connected: bool,
}

/// System of record kept in memory; `publish` stands in for the CDC feed.
#[derive(Debug)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { entities: BTreeMap::new(), pending: Vec::new(), connected: true }),
        }
    }

    /// Applies `event` to the current state and queues it for the next drain.
    pub fn publish(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        let key = (event.collection.clone(), event.id);
        match &event.change {
            Change::Added(payload) | Change::Changed(payload) => {
                state.entities.insert(key, payload.clone());
            }
            Change::Removed => {
                state.entities.remove(&key);
            }
        }
        state.pending.push(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Makes `fill` and `drain` fail until `reconnect`.
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    pub fn reconnect(&self) {
        self.state.lock().connected = true;
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl ChangeSource for MemorySource {
    fn fill(&self) -> Result<Fill<'_>> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(Error::FeedUnavailable("memory source disconnected".into()));
        }
        state.pending.clear();
        let snapshot: Vec<ChangeEvent> = state
            .entities
            .iter()
            .map(|((collection, id), payload)| ChangeEvent::added(collection.clone(), *id, payload.clone()))
            .collect();
        debug!(entities = snapshot.len(), "memory fill");
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn drain(&self) -> Result<Vec<ChangeEvent>> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(Error::FeedUnavailable("memory source disconnected".into()));
        }
        Ok(std::mem::take(&mut state.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchd_core::ChangeKind;

    #[test]
    fn fill_reflects_current_state_and_resets_pending() {
        let source = MemorySource::new();
        source.publish(ChangeEvent::added("motion", 2, b"{\"title\":\"b\"}".to_vec()));
        source.publish(ChangeEvent::added("motion", 1, b"{\"title\":\"a\"}".to_vec()));
        source.publish(ChangeEvent::changed("motion", 1, b"{\"title\":\"c\"}".to_vec()));
        source.publish(ChangeEvent::added("agenda", 5, b"{}".to_vec()));
        source.publish(ChangeEvent::removed("agenda", 5));

        let filled: Vec<ChangeEvent> = source.fill().expect("fill").collect::<Result<_>>().expect("events");
        assert_eq!(filled.len(), 2);
        assert!(filled.iter().all(|e| e.kind() == ChangeKind::Added));
        assert_eq!(filled[0].fqid(), "motion/1");
        assert_eq!(filled[0].payload(), Some(&b"{\"title\":\"c\"}"[..]));
        assert_eq!(source.pending(), 0);
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let source = MemorySource::new();
        source.publish(ChangeEvent::added("motion", 1, b"{}".to_vec()));
        source.publish(ChangeEvent::changed("motion", 1, b"{}".to_vec()));
        source.publish(ChangeEvent::removed("motion", 1));

        let kinds: Vec<_> = source.drain().expect("drain").iter().map(ChangeEvent::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed]);
        assert!(source.drain().expect("second drain").is_empty());
    }

    #[test]
    fn disconnected_source_fails_as_transport_error() {
        let source = MemorySource::new();
        source.disconnect();
        let err = source.drain().expect_err("disconnected");
        assert!(err.is_transport());
        assert!(source.fill().is_err());
        source.reconnect();
        assert!(source.drain().is_ok());
    }
}
