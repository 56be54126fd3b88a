//! HTTP persistence sink

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::models::Record;
use crate::source::http::error_message;

use super::{PersistenceSink, SinkResponse};

/// Posts record arrays as JSON
#[derive(Debug, Clone)]
pub struct HttpPersistenceSink {
    client: Client,
    endpoint: String,
}

impl HttpPersistenceSink {
    /// Create a sink posting to `endpoint`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Create a sink from configuration
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.timeout)
    }
}

#[async_trait::async_trait]
impl PersistenceSink for HttpPersistenceSink {
    async fn submit(&self, records: &[Record]) -> Result<SinkResponse> {
        debug!(endpoint = %self.endpoint, count = records.len(), "Submitting records");

        let response = self
            .client
            .post(&self.endpoint)
            .json(records)
            .send()
            .await
            .map_err(|e| Error::persist(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::persist(
                error_message(&body).unwrap_or_else(|| format!("store returned {status}")),
            ));
        }

        // the acknowledgement body is optional
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}
