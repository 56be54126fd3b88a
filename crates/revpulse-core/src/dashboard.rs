//! View state folded from scheduler events
//!
//! Each event overwrites the fields it carries; nothing is merged. When a
//! fetch fails and there is nothing on screen yet, the last-known-good
//! snapshot is loaded so a stale report is shown instead of an empty one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::models::{FilterCriteria, Record, Report};
use crate::pipeline::ReportBuilder;
use crate::scheduler::{ErrorOrigin, RefreshEvent};

/// Most recent failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardError {
    /// Failing stage
    pub origin: ErrorOrigin,
    /// Human-readable reason
    pub message: String,
}

/// Current dashboard view state
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardState {
    /// A fetch is in flight
    pub loading: bool,
    /// Rows currently shown
    pub rows: Vec<Record>,
    /// Most recent failure, cleared by the next successful fetch
    pub error: Option<DashboardError>,
    /// Latest save progress or result line
    pub save_message: Option<String>,
    /// When rows were last fetched
    pub last_fetch: Option<DateTime<Utc>>,
    /// When a save last completed
    pub last_save: Option<DateTime<Utc>>,
    /// Next scheduled cycle
    pub next_run: Option<DateTime<Utc>>,
    /// Set when rows came from the snapshot cache; when it was written
    pub stale_since: Option<DateTime<Utc>>,
    #[serde(skip)]
    cache: Option<SnapshotCache>,
}

impl DashboardState {
    /// Empty state without cache fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty state that falls back to `cache` on fetch failure
    pub fn with_cache(cache: SnapshotCache) -> Self {
        Self {
            cache: Some(cache),
            ..Self::default()
        }
    }

    /// Fold one event into the state
    pub fn apply(&mut self, event: &RefreshEvent) {
        self.apply_at(event, Utc::now());
    }

    /// Fold one event into the state, stamping saves with `now`
    pub fn apply_at(&mut self, event: &RefreshEvent, now: DateTime<Utc>) {
        match event {
            RefreshEvent::IntervalTriggered { next_run } => {
                self.next_run = Some(*next_run);
            }
            RefreshEvent::FetchStarted => {
                self.loading = true;
            }
            RefreshEvent::FetchCompleted { records, fetched_at } => {
                self.loading = false;
                self.rows = records.clone();
                self.error = None;
                self.last_fetch = Some(*fetched_at);
                self.stale_since = None;
            }
            RefreshEvent::SaveProgress(progress) => {
                self.save_message = Some(progress.message.clone());
            }
            RefreshEvent::SaveCompleted { message, .. } => {
                self.save_message = Some(message.clone());
                self.last_save = Some(now);
            }
            RefreshEvent::Error { origin, message } => {
                if *origin == ErrorOrigin::Fetch {
                    self.loading = false;
                    if self.rows.is_empty() {
                        self.restore_from_cache();
                    }
                }
                self.error = Some(DashboardError {
                    origin: *origin,
                    message: message.clone(),
                });
            }
        }
    }

    /// Load the cached snapshot into `rows`. Returns whether rows were
    /// restored.
    pub fn restore_from_cache(&mut self) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.load() {
            Ok(Some(snapshot)) => {
                debug!(
                    count = snapshot.records.len(),
                    saved_at = %snapshot.saved_at,
                    "Restored cached snapshot"
                );
                self.rows = snapshot.records;
                self.stale_since = Some(snapshot.saved_at);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Could not restore cached snapshot");
                false
            }
        }
    }

    /// Whether the rows on screen came from the cache
    pub fn is_stale(&self) -> bool {
        self.stale_since.is_some()
    }

    /// Build a report over the current rows
    pub fn report(&self, builder: &ReportBuilder, criteria: &FilterCriteria) -> Report {
        builder.build(&self.rows, criteria)
    }

    /// The report over cached rows, while they are still on screen
    pub fn stale_report(
        &self,
        builder: &ReportBuilder,
        criteria: &FilterCriteria,
    ) -> Option<Report> {
        self.stale_since.map(|_| self.report(builder, criteria))
    }
}
