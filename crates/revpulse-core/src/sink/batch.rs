//! Chunked, sequential batch persistence
//!
//! Chunks are submitted strictly one after another. The first failing chunk
//! aborts the save; chunks already accepted stay persisted (there is no
//! transaction across chunks).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::Record;

use super::PersistenceSink;

/// Progress after one chunk was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveProgress {
    /// 1-based index of the chunk just saved
    pub chunk: usize,
    /// Number of chunks in this save
    pub total_chunks: usize,
    /// Records persisted so far
    pub inserted: u64,
    /// Human-readable progress line
    pub message: String,
}

/// Result of saving one batch
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Every chunk was accepted
    Completed {
        /// Records persisted
        persisted: u64,
        /// Chunks submitted
        chunks: usize,
        /// Completion message
        message: String,
    },
    /// A chunk failed and the rest were not submitted
    Failed {
        /// 1-based index of the failing chunk
        chunk: usize,
        /// Records persisted before the failure
        persisted: u64,
        /// Failure message
        message: String,
        /// Records of the failing chunk and everything after it
        unsaved: Vec<Record>,
    },
}

impl SaveOutcome {
    /// Records persisted, whether or not the save completed
    pub fn persisted(&self) -> u64 {
        match self {
            Self::Completed { persisted, .. } | Self::Failed { persisted, .. } => *persisted,
        }
    }

    /// Whether every chunk was accepted
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Outcome message
    pub fn message(&self) -> &str {
        match self {
            Self::Completed { message, .. } | Self::Failed { message, .. } => message,
        }
    }
}

/// Splits batches into chunks and submits them in order
#[derive(Clone)]
pub struct BatchPersister {
    sink: Arc<dyn PersistenceSink>,
    chunk_size: usize,
}

impl BatchPersister {
    /// Create a persister; a zero chunk size is treated as 1
    pub fn new(sink: Arc<dyn PersistenceSink>, chunk_size: usize) -> Self {
        Self {
            sink,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Save a batch, calling `on_progress` after every accepted chunk of a
    /// chunked save
    pub async fn save<F>(&self, batch: &[Record], mut on_progress: F) -> SaveOutcome
    where
        F: FnMut(&SaveProgress) + Send,
    {
        if batch.is_empty() {
            debug!("Nothing to save");
            return SaveOutcome::Completed {
                persisted: 0,
                chunks: 0,
                message: "Nothing to save".to_string(),
            };
        }

        if batch.len() <= self.chunk_size {
            return self.save_single(batch).await;
        }

        let total_chunks = batch.len().div_ceil(self.chunk_size);
        let mut inserted: u64 = 0;

        for (index, chunk) in batch.chunks(self.chunk_size).enumerate() {
            let number = index + 1;
            match self.sink.submit(chunk).await {
                Ok(ack) => {
                    inserted += ack.inserted_count.unwrap_or(chunk.len() as u64);
                    let progress = SaveProgress {
                        chunk: number,
                        total_chunks,
                        inserted,
                        message: format!(
                            "Saved batch {number}/{total_chunks} (total saved: {inserted})"
                        ),
                    };
                    debug!(chunk = number, total_chunks, inserted, "Chunk saved");
                    on_progress(&progress);
                }
                Err(e) => {
                    warn!(
                        chunk = number,
                        total_chunks,
                        inserted,
                        error = %e,
                        "Chunk failed, aborting save"
                    );
                    return SaveOutcome::Failed {
                        chunk: number,
                        persisted: inserted,
                        message: format!("Batch {number} failed: {}", e.user_message()),
                        unsaved: batch[index * self.chunk_size..].to_vec(),
                    };
                }
            }
        }

        info!(inserted, total_chunks, "Batch saved");
        SaveOutcome::Completed {
            persisted: inserted,
            chunks: total_chunks,
            message: format!("Saved {inserted} records in {total_chunks} batches"),
        }
    }

    async fn save_single(&self, batch: &[Record]) -> SaveOutcome {
        match self.sink.submit(batch).await {
            Ok(ack) => {
                let persisted = ack.inserted_count.unwrap_or(batch.len() as u64);
                info!(persisted, "Batch saved");
                SaveOutcome::Completed {
                    persisted,
                    chunks: 1,
                    message: ack.message.unwrap_or_else(|| "Saved successfully".to_string()),
                }
            }
            Err(e) => {
                warn!(error = %e, "Save failed");
                SaveOutcome::Failed {
                    chunk: 1,
                    persisted: 0,
                    message: e.user_message(),
                    unsaved: batch.to_vec(),
                }
            }
        }
    }
}
