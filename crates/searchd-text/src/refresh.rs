//! Background loop that keeps the index current.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use searchd_core::config::{IndexSettings, MAX_DURATION};

use crate::error::SearchError;
use crate::index::{IndexState, TextIndex};

#[derive(Debug, Clone, Copy)]
enum Work {
	Update,
	Rebuild,
}

/// Drains changes on a fixed cadence or when nudged, and rebuilds the index
/// periodically or after a failure that may have lost changes.
pub struct Refresher {
	index: Arc<TextIndex>,
	update_interval: Duration,
	/// Zero disables periodic rebuilds.
	rebuild_interval: Duration,
	nudge: Arc<Notify>,
}

impl Refresher {
	pub fn new(index: Arc<TextIndex>, settings: &IndexSettings) -> Self {
		Self {
			index,
			update_interval: settings.update_interval.clamp(Duration::from_millis(10), MAX_DURATION),
			rebuild_interval: settings.rebuild_interval.min(MAX_DURATION),
			nudge: Arc::new(Notify::new()),
		}
	}

	/// Handle that makes the loop drain immediately.
	pub fn nudger(&self) -> Arc<Notify> {
		Arc::clone(&self.nudge)
	}

	pub async fn run(self, cancel: CancellationToken) {
		let mut updates = ticker(self.update_interval);
		let mut rebuilds = (!self.rebuild_interval.is_zero()).then(|| ticker(self.rebuild_interval));
		let mut rebuild_pending = false;
		info!(
			update_ms = self.update_interval.as_millis() as u64,
			rebuild_ms = self.rebuild_interval.as_millis() as u64,
			"refresh loop started"
		);

		loop {
			let work = tokio::select! {
				_ = cancel.cancelled() => break,
				_ = updates.tick() => Work::Update,
				_ = self.nudge.notified() => Work::Update,
				_ = next_tick(&mut rebuilds) => Work::Rebuild,
			};
			if cancel.is_cancelled() {
				break;
			}
			let work = if rebuild_pending { Work::Rebuild } else { work };
			match self.perform(work).await {
				Ok(()) => {
					if matches!(work, Work::Rebuild) {
						rebuild_pending = false;
					}
				}
				Err(e) if e.triggers_rebuild() => {
					warn!(error = %e, ?work, "refresh failed; scheduling rebuild");
					rebuild_pending = true;
				}
				Err(e) => warn!(error = %e, ?work, "refresh failed"),
			}
			if self.index.state() == IndexState::Closed {
				break;
			}
		}
		info!("refresh loop stopped");
	}

	async fn perform(&self, work: Work) -> Result<(), SearchError> {
		let index = Arc::clone(&self.index);
		let done = tokio::task::spawn_blocking(move || match work {
			Work::Update => index.update().map(|applied| {
				if applied > 0 {
					debug!(applied, "index updated");
				}
			}),
			Work::Rebuild => index.rebuild(),
		})
		.await?;
		done
	}
}

fn ticker(period: Duration) -> Interval {
	let mut interval = tokio::time::interval_at(Instant::now() + period, period);
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
	interval
}

async fn next_tick(interval: &mut Option<Interval>) {
	match interval {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending().await,
	}
}
