//! Query server: admission control, tenant scoping and result shaping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, warn};

use searchd_core::config::{Settings, MAX_DURATION};
use searchd_core::{Answer, FieldRelations};

use crate::error::{Result, SearchError};
use crate::generation::Hit;
use crate::index::TextIndex;

/// Fully-qualified id -> answer.
pub type Answers = BTreeMap<String, Answer>;

#[derive(Debug, Clone)]
pub struct QueryOptions {
	/// Maximum number of concurrently executing queries.
	pub max_queue: usize,
	pub timeout: Duration,
	pub max_hits: usize,
	/// Staleness after which a query wakes the refresh loop.
	pub age: Duration,
}

impl Default for QueryOptions {
	fn default() -> Self {
		Self::from(&Settings::default())
	}
}

impl From<&Settings> for QueryOptions {
	fn from(settings: &Settings) -> Self {
		Self {
			max_queue: settings.web.max_queue,
			timeout: settings.web.query_timeout,
			max_hits: settings.index.max_hits,
			age: settings.index.age,
		}
	}
}

/// Held while a query runs; dropping it frees the slot.
#[derive(Debug)]
pub struct Admission {
	_permit: OwnedSemaphorePermit,
}

pub struct QueryServer {
	index: Arc<TextIndex>,
	permits: Arc<Semaphore>,
	options: QueryOptions,
	refresh: Option<Arc<Notify>>,
	closing: AtomicBool,
}

impl QueryServer {
	pub fn new(index: Arc<TextIndex>, options: QueryOptions) -> Self {
		let max_queue = options.max_queue.max(1);
		Self {
			index,
			permits: Arc::new(Semaphore::new(max_queue)),
			options: QueryOptions { max_queue, ..options },
			refresh: None,
			closing: AtomicBool::new(false),
		}
	}

	/// Wakes `refresh` when a query finds the index older than `age`.
	pub fn with_refresh(mut self, refresh: Arc<Notify>) -> Self {
		self.refresh = Some(refresh);
		self
	}

	pub fn index(&self) -> &Arc<TextIndex> {
		&self.index
	}

	/// Fields the access boundary fetches for hits of `collection`.
	pub fn request_fields(&self, collection: &str) -> Option<FieldRelations> {
		self.index.collection_request_fields(collection)
	}

	/// Number of queries that may start right now.
	pub fn available(&self) -> usize {
		self.permits.available_permits()
	}

	/// Claims one execution slot without waiting.
	pub fn admit(&self) -> Result<Admission> {
		if self.closing.load(Ordering::Acquire) {
			return Err(SearchError::ShuttingDown);
		}
		match Arc::clone(&self.permits).try_acquire_owned() {
			Ok(permit) => Ok(Admission { _permit: permit }),
			Err(TryAcquireError::NoPermits) => Err(SearchError::Overloaded),
			Err(TryAcquireError::Closed) => Err(SearchError::ShuttingDown),
		}
	}

	/// `meeting_id <= 0` searches unscoped.
	pub async fn query(&self, question: &str, meeting_id: i64) -> Result<Answers> {
		let deadline = Instant::now() + self.options.timeout.min(MAX_DURATION);
		self.query_with_deadline(question, meeting_id, deadline).await
	}

	pub async fn query_with_deadline(&self, question: &str, meeting_id: i64, deadline: Instant) -> Result<Answers> {
		let question = question.trim();
		if question.is_empty() {
			return Err(SearchError::InvalidQuery("missing query".into()));
		}
		let admission = self.admit()?;
		self.nudge_if_stale();
		let generation = self.index.snapshot().ok_or(SearchError::NotServing)?;
		let scope = (meeting_id > 0).then_some(meeting_id);
		let limit = self.options.max_hits;
		let text = question.to_string();
		let started = Instant::now();

		// The admission moves into the task so the slot stays taken until the
		// search really ends, even when the caller gave up on it.
		let task = tokio::task::spawn_blocking(move || {
			let _admission = admission;
			generation.search(&text, scope, limit)
		});
		let hits = match tokio::time::timeout_at(deadline, task).await {
			Ok(joined) => joined??,
			Err(_) => {
				warn!(question, ?scope, "query deadline exceeded");
				return Err(SearchError::DeadlineExceeded);
			}
		};

		let raw = hits.len();
		let (answers, dupes) = collect_answers(hits);
		debug!(
			question,
			?scope,
			hits = raw,
			answers = answers.len(),
			dupes,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"query served"
		);
		Ok(answers)
	}

	fn nudge_if_stale(&self) {
		let Some(refresh) = &self.refresh else {
			return;
		};
		if self.index.staleness().is_some_and(|age| age > self.options.age) {
			refresh.notify_one();
		}
	}

	/// Stops admitting queries and waits for the running ones.
	pub async fn shutdown(&self) {
		self.closing.store(true, Ordering::Release);
		let all = u32::try_from(self.options.max_queue).unwrap_or(u32::MAX);
		match self.permits.acquire_many(all).await {
			Ok(permits) => drop(permits),
			Err(_) => debug!("query server already shut down"),
		}
		self.permits.close();
		debug!("query server drained");
	}
}

/// Keeps the first hit per fully-qualified id and counts the rest.
pub fn collect_answers(hits: Vec<Hit>) -> (Answers, usize) {
	let mut answers = Answers::new();
	let mut dupes = 0;
	for hit in hits {
		if answers.contains_key(&hit.fqid) {
			dupes += 1;
			continue;
		}
		answers.insert(hit.fqid, Answer { score: hit.score, matched_words: hit.matched_words });
	}
	(answers, dupes)
}
