//! Error types for RevPulse

use thiserror::Error;

/// Result type alias using RevPulse's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for RevPulse operations
#[derive(Error, Debug)]
pub enum Error {
    /// Record source could not deliver a batch
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Persistence sink rejected a batch
    #[error("Persist error: {0}")]
    Persist(String),

    /// Aggregation input was not a sequence of records
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Snapshot cache could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a persist error
    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Human-readable message without the category prefix.
    ///
    /// This is what gets surfaced inline next to stale data.
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(msg)
            | Self::Persist(msg)
            | Self::InvalidInput(msg)
            | Self::Cache(msg)
            | Self::Config(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
