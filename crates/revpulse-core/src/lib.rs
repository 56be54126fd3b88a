//! # RevPulse
//!
//! Hourly ad revenue refresh and reporting.
//!
//! RevPulse pulls realtime revenue rows from a partner reporting API once an
//! hour, keeps the last good batch as a local snapshot, forwards every batch
//! to a backend store in fixed-size chunks, and turns raw rows into ranked,
//! per-site reports.
//!
//! ## Architecture
//!
//! - **Source**: Partner API and backend store readers
//! - **Scheduler**: Hour-aligned refresh loop emitting progress events
//! - **Sink**: Chunked, sequential persistence
//! - **Pipeline**: Filtering, aggregation, ranking and formatting
//! - **Cache**: Last-known-good snapshot for stale-but-available views
//!
//! ## Quick Start
//!
//! ```bash
//! # Refresh every hour and persist each batch
//! revpulse watch
//!
//! # Aggregated report over what the store already has
//! revpulse report --agency Travado --top 5
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod source;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::cache::{FileSnapshotStore, MemorySnapshotStore, SnapshotCache, SnapshotStore};
    pub use crate::config::Config;
    pub use crate::dashboard::DashboardState;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::pipeline::ReportBuilder;
    pub use crate::scheduler::{RefreshEvent, RefreshScheduler, SchedulerHandle, SchedulerSettings};
    pub use crate::sink::{BatchPersister, HttpPersistenceSink, PersistenceSink, SaveOutcome};
    pub use crate::source::{FetchQuery, HttpRecordSource, RecordSource, ReportKind};
}
