//! HTTP record source

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::{SourceConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::models::Record;

use super::{FetchQuery, RecordSource};

/// Which partner report to pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportKind {
    /// Realtime revenue by channel
    #[default]
    Channel,
    /// Realtime revenue by geography
    Geo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    /// `accessToken` and `startDate` query parameters
    Partner,
    /// No parameters
    Plain,
}

/// Fetches record batches over HTTP
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: Client,
    endpoint: String,
    mode: QueryMode,
    name: String,
}

impl HttpRecordSource {
    /// Source for a partner reporting endpoint
    pub fn partner(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::build(endpoint.into(), QueryMode::Partner, "partner", timeout)
    }

    /// Source for the backend store's read endpoint
    pub fn store(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::build(endpoint.into(), QueryMode::Plain, "store", timeout)
    }

    /// Partner source from configuration
    pub fn from_source_config(config: &SourceConfig, kind: ReportKind) -> Result<Self> {
        let endpoint = match kind {
            ReportKind::Channel => &config.endpoint,
            ReportKind::Geo => &config.geo_endpoint,
        };
        Self::partner(endpoint.clone(), config.timeout)
    }

    /// Store source from configuration
    pub fn from_store_config(config: &StoreConfig) -> Result<Self> {
        Self::store(config.endpoint.clone(), config.timeout)
    }

    fn build(endpoint: String, mode: QueryMode, name: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            mode,
            name: name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Record>> {
        let mut request = self.client.get(&self.endpoint);
        if self.mode == QueryMode::Partner {
            request = request.query(&[
                ("accessToken", query.access_token.as_str()),
                ("startDate", query.date.as_str()),
            ]);
        }

        debug!(
            source = %self.name,
            endpoint = %self.endpoint,
            date = %query.date,
            "Fetching records"
        );

        let response = request.send().await.map_err(|e| Error::fetch(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| format!("{} returned {}", self.name, status));
            return Err(Error::fetch(message));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::fetch(format!("invalid response body: {e}")))?;

        let records =
            Record::batch_from_json(&payload).map_err(|e| Error::fetch(e.user_message()))?;

        info!(source = %self.name, count = records.len(), "Fetched records");
        Ok(records)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Pull a `message` field out of an error body, if there is one
pub(crate) fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(String::from)
}
