//! Persistence sink
//!
//! [`PersistenceSink`] submits one JSON array of records to a durable store.
//! [`BatchPersister`] sits in front of it and splits large batches into
//! fixed-size chunks, submitted one after another.

mod batch;
mod http;

pub use batch::{BatchPersister, SaveOutcome, SaveProgress};
pub use http::HttpPersistenceSink;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Record;

/// Acknowledgement returned by the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkResponse {
    /// Number of records the store reports as inserted
    #[serde(default)]
    pub inserted_count: Option<u64>,
    /// Store-provided status message
    #[serde(default)]
    pub message: Option<String>,
}

/// Durable store accepting record arrays
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Submit one array payload
    async fn submit(&self, records: &[Record]) -> Result<SinkResponse>;
}

/// What happens to records of a chunk that failed to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Drop them; the next cycle persists its own fresh batch only
    #[default]
    None,
    /// Keep them and prepend them to the next cycle's save
    NextCycle,
}
