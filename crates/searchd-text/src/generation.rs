//! One complete build of the index bound to one directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::Query;
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{DocAddress, DocSet, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, warn};

use crate::analyzer;
use crate::error::{Result, SearchError};
use crate::mapping::IndexMapping;
use crate::query;

/// Write applied to a generation as part of a batch.
#[derive(Debug)]
pub enum IndexOp {
	/// Replace whatever is stored under `fqid` with `doc`.
	Put { fqid: String, doc: TantivyDocument },
	Delete { fqid: String },
}

/// Raw hit before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
	pub fqid: String,
	pub score: f32,
	pub matched_words: BTreeMap<String, Vec<String>>,
}

/// Removes the generation directory when dropped.
#[derive(Debug)]
struct StorageGuard {
	path: Option<PathBuf>,
}

impl StorageGuard {
	fn remove(&mut self) -> Result<()> {
		match self.path.take() {
			Some(path) => match std::fs::remove_dir_all(&path) {
				Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SearchError::StorageRemove { path, source: e }),
				_ => Ok(()),
			},
			None => Ok(()),
		}
	}
}

impl Drop for StorageGuard {
	fn drop(&mut self) {
		if let Err(e) = self.remove() {
			warn!(error = %e, "releasing generation storage failed");
		}
	}
}

pub struct Generation {
	id: u64,
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	mapping: Arc<IndexMapping>,
	// Declared last: dropped after the writer has released its files.
	storage: StorageGuard,
}

impl std::fmt::Debug for Generation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Generation").field("id", &self.id).field("path", &self.storage.path).finish()
	}
}

impl Generation {
	/// Creates an empty generation in `path`, which must not exist yet.
	pub fn create(id: u64, path: PathBuf, mapping: Arc<IndexMapping>, writer_memory: usize) -> Result<Self> {
		std::fs::create_dir_all(&path).map_err(|source| SearchError::StorageCreate { path: path.clone(), source })?;
		let storage = StorageGuard { path: Some(path.clone()) };
		let open_err = |source: tantivy::TantivyError| SearchError::StorageOpen { path: path.clone(), source };
		let index = Index::create_in_dir(&path, mapping.schema().clone()).map_err(open_err)?;
		analyzer::register(&index);
		let writer: IndexWriter = index.writer(writer_memory).map_err(open_err)?;
		let reader: IndexReader =
			index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(open_err)?;
		debug!(generation = id, path = %path.display(), "generation created");
		Ok(Self { id, index, reader, writer: Mutex::new(writer), mapping, storage })
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn path(&self) -> Option<&Path> {
		self.storage.path.as_deref()
	}

	pub fn mapping(&self) -> &IndexMapping {
		&self.mapping
	}

	pub fn num_docs(&self) -> u64 {
		self.reader.searcher().num_docs()
	}

	/// Applies `ops` as one commit and makes them visible to new searchers.
	/// On failure nothing of the batch becomes visible.
	pub fn apply(&self, ops: Vec<IndexOp>) -> Result<usize> {
		let count = ops.len();
		let batch_err = |source: tantivy::TantivyError| SearchError::BatchWrite { generation: self.id, source };
		let mut writer = self.writer.lock();
		if let Err(e) = write_batch(&mut writer, self.mapping.id_field(), ops) {
			if let Err(rollback) = writer.rollback() {
				warn!(generation = self.id, error = %rollback, "rollback after failed batch failed");
			}
			return Err(batch_err(e));
		}
		drop(writer);
		self.reader.reload().map_err(batch_err)?;
		debug!(generation = self.id, ops = count, "batch committed");
		Ok(count)
	}

	/// Point-in-time view; later batches are not visible through it.
	pub fn searcher(&self) -> Searcher {
		self.reader.searcher()
	}

	/// Runs a free-text query, optionally scoped to one meeting.
	pub fn search(&self, question: &str, meeting_id: Option<i64>, limit: usize) -> Result<Vec<Hit>> {
		let text = query::parse_text(&self.index, &self.mapping, question)?;
		let mut terms: Vec<Term> = Vec::new();
		text.query_terms(&mut |term, _| terms.push(term.clone()));
		let full = query::scoped(&self.mapping, text, meeting_id);

		let searcher = self.searcher();
		let top_docs = searcher.search(&full, &TopDocs::with_limit(limit))?;

		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let Some(fqid) = doc.get_first(self.mapping.id_field()).and_then(|v| v.as_str()) else {
				warn!(generation = self.id, ?addr, "hit without id");
				continue;
			};
			let matched_words = self.matched_words(&searcher, addr, &terms)?;
			hits.push(Hit { fqid: fqid.to_string(), score, matched_words });
		}
		Ok(hits)
	}

	/// Query terms present in the postings of the hit, grouped by model field.
	fn matched_words(&self, searcher: &Searcher, addr: DocAddress, terms: &[Term]) -> Result<BTreeMap<String, Vec<String>>> {
		let segment = searcher.segment_reader(addr.segment_ord);
		let mut matched: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for term in terms {
			let Some(name) = self.mapping.source_name(term.field()) else {
				continue;
			};
			let value = term.value();
			let Some(word) = value.as_str() else {
				continue;
			};
			let inverted = segment.inverted_index(term.field())?;
			let Some(mut postings) = inverted.read_postings(term, IndexRecordOption::Basic).map_err(SearchError::Postings)? else {
				continue;
			};
			if postings.seek(addr.doc_id) == addr.doc_id {
				matched.entry(name.to_string()).or_default().push(word.to_string());
			}
		}
		for words in matched.values_mut() {
			words.sort();
			words.dedup();
		}
		Ok(matched)
	}

	/// Waits for background merges and removes the storage.
	pub fn close(self) -> Result<()> {
		let Generation { id, index, reader, writer, mapping, mut storage } = self;
		drop(reader);
		if let Err(e) = writer.into_inner().wait_merging_threads() {
			warn!(generation = id, error = %e, "waiting for merges failed");
		}
		drop(index);
		drop(mapping);
		storage.remove()?;
		debug!(generation = id, "generation closed");
		Ok(())
	}
}

fn write_batch(writer: &mut IndexWriter, id_field: tantivy::schema::Field, ops: Vec<IndexOp>) -> tantivy::Result<()> {
	for op in ops {
		match op {
			IndexOp::Put { fqid, doc } => {
				writer.delete_term(Term::from_field_text(id_field, &fqid));
				writer.add_document(doc)?;
			}
			IndexOp::Delete { fqid } => {
				writer.delete_term(Term::from_field_text(id_field, &fqid));
			}
		}
	}
	writer.commit()?;
	Ok(())
}
