//! Last-known-good snapshot cache
//!
//! The most recent successfully fetched batch is kept under a single key so
//! the dashboard has something to show while the source is down. Values are
//! opaque JSON strings; [`SnapshotCache`] layers record (de)serialization on
//! top of a [`SnapshotStore`].

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::models::Record;

/// Key/value storage for snapshot payloads
pub trait SnapshotStore: Send + Sync {
    /// Read the value stored under `key`
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value stored under `key`, if any
    fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key in a cache directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Store under the platform cache directory
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "revpulse", "revpulse")
            .ok_or_else(|| Error::cache("Cannot determine cache directory"))?;
        Ok(Self::with_dir(dirs.cache_dir().to_path_buf()))
    }

    /// Store under an explicit directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store from configuration, falling back to the platform cache dir
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Ok(Self::with_dir(dir.clone())),
            None => Self::new(),
        }
    }

    /// Path of the file backing `key`
    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::cache(format!("Failed to read {}: {e}", path.display())))?;
        Ok(Some(content))
    }

    /// Atomic write: temp file, sync, rename
    fn store(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path(key);
        let temp_path = path.with_extension("json.tmp");

        {
            let mut file = File::create(&temp_path)
                .map_err(|e| Error::cache(format!("Failed to create temp file: {e}")))?;
            file.write_all(value.as_bytes())
                .map_err(|e| Error::cache(format!("Failed to write temp file: {e}")))?;
            file.sync_all()
                .map_err(|e| Error::cache(format!("Failed to sync temp file: {e}")))?;
        }

        fs::rename(&temp_path, &path)
            .map_err(|e| Error::cache(format!("Failed to rename temp file: {e}")))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// In-process store, used when nothing should touch disk
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// A cached batch and when it was written
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// When the batch was cached
    pub saved_at: DateTime<Utc>,
    /// The cached records
    pub records: Vec<Record>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    saved_at: DateTime<Utc>,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct RawEnvelope {
    saved_at: DateTime<Utc>,
    records: serde_json::Value,
}

/// Record-level view over a [`SnapshotStore`] key
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn SnapshotStore>,
    key: String,
}

impl SnapshotCache {
    /// Cache batches under `key`
    pub fn new(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// File-backed cache from configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let store = FileSnapshotStore::from_config(config)?;
        Ok(Self::new(Arc::new(store), config.report_key.clone()))
    }

    /// Key batches are stored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the cached batch
    pub fn save(&self, records: &[Record]) -> Result<()> {
        self.save_at(records, Utc::now())
    }

    /// Replace the cached batch with an explicit timestamp
    pub fn save_at(&self, records: &[Record], saved_at: DateTime<Utc>) -> Result<()> {
        let body = serde_json::to_string(&Envelope { saved_at, records })
            .map_err(|e| Error::cache(format!("Serialization failed: {e}")))?;
        self.store.store(&self.key, &body)?;
        debug!(key = %self.key, count = records.len(), "Cached snapshot");
        Ok(())
    }

    /// Read the cached batch, if one exists
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let Some(body) = self.store.load(&self.key)? else {
            return Ok(None);
        };

        let raw: RawEnvelope = serde_json::from_str(&body).map_err(|e| {
            warn!(key = %self.key, error = %e, "Corrupted snapshot");
            Error::cache(format!("Corrupted snapshot: {e}"))
        })?;
        let records = Record::batch_from_json(&raw.records)
            .map_err(|e| Error::cache(format!("Corrupted snapshot: {}", e.user_message())))?;

        Ok(Some(Snapshot {
            saved_at: raw.saved_at,
            records,
        }))
    }

    /// Drop the cached batch
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache").field("key", &self.key).finish()
    }
}
