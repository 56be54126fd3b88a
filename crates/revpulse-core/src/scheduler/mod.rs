//! Periodic refresh scheduling
//!
//! The scheduler owns the timer. Each cycle fetches one batch, caches it as
//! last-known-good, and hands it to the batch persister. Progress is reported
//! as [`RefreshEvent`]s over an unbounded channel so consumers never block
//! the scheduler.

mod clock;
mod refresh;

pub use clock::{next_aligned, Clock, InstantClock, SystemClock};
pub use refresh::{RefreshScheduler, SchedulerHandle};

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::models::Record;
use crate::sink::{RetryPolicy, SaveProgress};

/// Which stage of a cycle produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The record source
    Fetch,
    /// The persistence sink
    Persist,
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Notifications emitted by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshEvent {
    /// A cycle started; `next_run` is when the timer fires next
    IntervalTriggered {
        /// Next scheduled cycle
        next_run: DateTime<Utc>,
    },
    /// The fetch phase began
    FetchStarted,
    /// A batch was fetched
    FetchCompleted {
        /// The fetched records
        records: Vec<Record>,
        /// When the fetch finished
        fetched_at: DateTime<Utc>,
    },
    /// A chunk of a chunked save was accepted
    SaveProgress(SaveProgress),
    /// The whole batch was persisted
    SaveCompleted {
        /// Records persisted
        persisted: u64,
        /// Completion message
        message: String,
    },
    /// A fetch or save failed
    Error {
        /// Failing stage
        origin: ErrorOrigin,
        /// Human-readable reason
        message: String,
    },
}

/// Coarse scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No fetch in flight
    #[default]
    Idle,
    /// A fetch is in flight
    Fetching,
}

/// Everything a scheduler needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between cycles
    pub interval: Duration,
    /// Delay the first cycle to the next wall-clock hour
    pub align_to_hour: bool,
    /// Command channel capacity
    pub command_buffer: usize,
    /// Credential passed to the source
    pub access_token: String,
    /// Time zone for the report date and hour alignment
    pub timezone: Tz,
    /// What happens to records of a failed save chunk
    pub retry: RetryPolicy,
}

impl SchedulerSettings {
    /// Settings from the loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            interval: config.scheduler.interval,
            align_to_hour: config.scheduler.align_to_hour,
            command_buffer: config.scheduler.command_buffer.max(1),
            access_token: config.source.access_token.clone(),
            timezone: config.source.tz()?,
            retry: config.sink.retry,
        })
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            align_to_hour: true,
            command_buffer: 16,
            access_token: String::new(),
            timezone: chrono_tz::America::Los_Angeles,
            retry: RetryPolicy::None,
        }
    }
}
