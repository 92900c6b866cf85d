//! Text index lifecycle: build, incremental update, rebuild-and-swap, close.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use searchd_core::config::IndexSettings;
use searchd_core::{Change, ChangeEvent, ChangeKind, CollectionDescriptor, Error, FieldRelations, RequestFields};
use searchd_ingest::ChangeSource;

use crate::error::{Result, SearchError};
use crate::generation::{Generation, IndexOp};
use crate::mapping::IndexMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Uninitialized,
    Building,
    Serving,
    Rebuilding,
    Closed,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Building => "building",
            IndexState::Serving => "serving",
            IndexState::Rebuilding => "rebuilding",
            IndexState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Directory holding one sub-directory per generation.
    pub root: PathBuf,
    pub batch: usize,
    pub writer_memory: usize,
}

impl From<&IndexSettings> for IndexOptions {
    fn from(settings: &IndexSettings) -> Self {
        Self { root: settings.path.clone(), batch: settings.batch, writer_memory: settings.writer_memory }
    }
}

impl IndexOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = IndexSettings::default();
        Self { root: root.into(), batch: defaults.batch, writer_memory: defaults.writer_memory }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }
}

/// Live full-text index over a change source.
///
/// Readers pin the live generation with [`TextIndex::snapshot`]; a swap only
/// changes what later snapshots see.
pub struct TextIndex {
    options: IndexOptions,
    collections: Arc<CollectionDescriptor>,
    mapping: Arc<IndexMapping>,
    source: Arc<dyn ChangeSource>,
    live: ArcSwapOption<Generation>,
    // Serializes build, update, rebuild and close.
    ingest: Mutex<()>,
    state: Mutex<IndexState>,
    next_generation: AtomicU64,
    last_update: Mutex<Option<Instant>>,
}

impl TextIndex {
    pub fn new(collections: CollectionDescriptor, source: Arc<dyn ChangeSource>, options: IndexOptions) -> Self {
        let mapping = Arc::new(IndexMapping::new(&collections));
        Self {
            options,
            collections: Arc::new(collections),
            mapping,
            source,
            live: ArcSwapOption::empty(),
            ingest: Mutex::new(()),
            state: Mutex::new(IndexState::Uninitialized),
            next_generation: AtomicU64::new(1),
            last_update: Mutex::new(None),
        }
    }

    /// `new` followed by `build`.
    pub fn open(collections: CollectionDescriptor, source: Arc<dyn ChangeSource>, options: IndexOptions) -> Result<Self> {
        let index = Self::new(collections, source, options);
        index.build()?;
        Ok(index)
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock()
    }

    pub fn collections(&self) -> &CollectionDescriptor {
        &self.collections
    }

    pub fn mapping(&self) -> &IndexMapping {
        &self.mapping
    }

    pub fn request_fields(&self) -> RequestFields {
        self.collections.request_fields()
    }

    /// Field names and relation descriptors of one collection.
    pub fn collection_request_fields(&self, collection: &str) -> Option<FieldRelations> {
        let fields = self.collections.get(collection)?;
        Some(fields.iter().map(|(name, descriptor)| (name.clone(), descriptor.relation.clone())).collect())
    }

    /// Pins the live generation for the duration of a read.
    pub fn snapshot(&self) -> Option<Arc<Generation>> {
        self.live.load_full()
    }

    /// Time since the last successful build, update or rebuild.
    pub fn staleness(&self) -> Option<Duration> {
        self.last_update.lock().map(|at| at.elapsed())
    }

    fn touch(&self) {
        *self.last_update.lock() = Some(Instant::now());
    }

    fn set_state(&self, state: IndexState) {
        *self.state.lock() = state;
    }

    /// Wipes the index root and builds the first generation from a full fill.
    pub fn build(&self) -> Result<()> {
        let _ingest = self.ingest.lock();
        match self.state() {
            IndexState::Uninitialized => {}
            IndexState::Closed => return Err(SearchError::Closed),
            _ => return Err(SearchError::AlreadyBuilt),
        }
        self.set_state(IndexState::Building);
        let started = Instant::now();
        let built = self.reset_root().and_then(|()| self.fill_generation());
        match built {
            Ok(generation) => {
                info!(
                    generation = generation.id(),
                    docs = generation.num_docs(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "index built"
                );
                self.live.store(Some(Arc::new(generation)));
                self.set_state(IndexState::Serving);
                self.touch();
                Ok(())
            }
            Err(e) => {
                self.set_state(IndexState::Uninitialized);
                Err(SearchError::Build(Box::new(e)))
            }
        }
    }

    fn reset_root(&self) -> Result<()> {
        let root = &self.options.root;
        match std::fs::remove_dir_all(root) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(SearchError::StorageRemove { path: root.clone(), source: e });
            }
            _ => {}
        }
        std::fs::create_dir_all(root).map_err(|source| SearchError::StorageCreate { path: root.clone(), source })
    }

    /// Fresh generation filled from the source. Dropping it on error removes
    /// its storage.
    fn fill_generation(&self) -> Result<Generation> {
        let id = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let path = self.options.root.join(format!("gen-{id}"));
        let generation = Generation::create(id, path, Arc::clone(&self.mapping), self.options.writer_memory)?;
        let mut batch = Batcher::new(&generation, self.options.batch);
        for event in self.source.fill().map_err(SearchError::Fill)? {
            let event = event.map_err(SearchError::Fill)?;
            let kind = event.kind();
            if kind != ChangeKind::Added {
                return Err(SearchError::Fill(Error::InvalidEvent {
                    collection: event.collection,
                    id: event.id,
                    reason: format!("fill emitted a {kind} event"),
                }));
            }
            if let Some(op) = self.translate(event) {
                batch.push(op)?;
            }
        }
        batch.finish()?;
        Ok(generation)
    }

    fn translate(&self, event: ChangeEvent) -> Option<IndexOp> {
        let Some(fields) = self.collections.get(&event.collection) else {
            trace!(collection = %event.collection, id = event.id, "skipping unknown collection");
            return None;
        };
        let fqid = event.fqid();
        Some(match &event.change {
            Change::Added(payload) | Change::Changed(payload) => IndexOp::Put {
                doc: self.mapping.document(&event.collection, fields, event.id, payload),
                fqid,
            },
            Change::Removed => IndexOp::Delete { fqid },
        })
    }

    /// Drains pending changes into the live generation. Returns the number of
    /// index operations applied.
    pub fn update(&self) -> Result<usize> {
        let _ingest = self.ingest.lock();
        let generation = self.serving_generation()?;
        let events = self.source.drain().map_err(SearchError::Drain)?;
        if events.is_empty() {
            self.touch();
            return Ok(0);
        }
        let received = events.len();
        let mut batch = Batcher::new(&generation, self.options.batch);
        for event in events {
            if let Some(op) = self.translate(event) {
                batch.push(op)?;
            }
        }
        let applied = batch.finish()?;
        self.touch();
        debug!(generation = generation.id(), received, applied, "changes applied");
        Ok(applied)
    }

    fn serving_generation(&self) -> Result<Arc<Generation>> {
        match (self.state(), self.live.load_full()) {
            (IndexState::Closed, _) => Err(SearchError::Closed),
            (_, Some(generation)) => Ok(generation),
            (_, None) => Err(SearchError::NotServing),
        }
    }

    /// Builds a new generation next to the live one and swaps it in. The old
    /// generation is released once its last reader finishes.
    pub fn rebuild(&self) -> Result<()> {
        let _ingest = self.ingest.lock();
        self.serving_generation()?;
        self.set_state(IndexState::Rebuilding);
        let started = Instant::now();
        let generation = match self.fill_generation() {
            Ok(generation) => generation,
            Err(e) => {
                self.set_state(IndexState::Serving);
                return Err(SearchError::Rebuild(Box::new(e)));
            }
        };
        let id = generation.id();
        let docs = generation.num_docs();
        let old = self.live.swap(Some(Arc::new(generation)));
        self.set_state(IndexState::Serving);
        self.touch();
        info!(generation = id, docs, elapsed_ms = started.elapsed().as_millis() as u64, "index rebuilt");
        if let Some(old) = old {
            if let Err(e) = retire(old) {
                warn!(error = %e, "retiring old generation failed");
            }
        }
        Ok(())
    }

    /// Releases the live generation and its storage. Idempotent.
    pub fn close(&self) -> Result<()> {
        let _ingest = self.ingest.lock();
        self.set_state(IndexState::Closed);
        let Some(generation) = self.live.swap(None) else {
            return Ok(());
        };
        retire(generation)?;
        match std::fs::remove_dir(&self.options.root) {
            Ok(()) => {}
            Err(e) => debug!(path = %self.options.root.display(), error = %e, "index root kept"),
        }
        info!("index closed");
        Ok(())
    }
}

/// Closes `generation` now if nobody else holds it; otherwise its storage
/// goes away with the last reference.
fn retire(generation: Arc<Generation>) -> Result<()> {
    match Arc::try_unwrap(generation) {
        Ok(generation) => generation.close(),
        Err(pinned) => {
            debug!(generation = pinned.id(), readers = Arc::strong_count(&pinned) - 1, "generation still pinned");
            Ok(())
        }
    }
}

/// Accumulates index operations and flushes them at the batch size.
struct Batcher<'a> {
    generation: &'a Generation,
    size: usize,
    ops: Vec<IndexOp>,
    applied: usize,
}

impl<'a> Batcher<'a> {
    fn new(generation: &'a Generation, size: usize) -> Self {
        Self { generation, size: size.max(1), ops: Vec::new(), applied: 0 }
    }

    fn push(&mut self, op: IndexOp) -> Result<()> {
        self.ops.push(op);
        if self.ops.len() >= self.size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.ops);
        self.applied += self.generation.apply(ops)?;
        Ok(())
    }

    fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.applied)
    }
}
