//! Record sources
//!
//! A [`RecordSource`] fetches one batch of raw records for a query. The HTTP
//! implementation talks to either the partner reporting API (credential and
//! report date in the query string) or the backend store (plain GET).

pub(crate) mod http;

pub use http::{HttpRecordSource, ReportKind};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::models::Record;

/// Report date format expected by the partner API
pub const QUERY_DATE_FORMAT: &str = "%m/%d/%Y";

/// Parameters of a single fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    /// Access credential
    pub access_token: String,
    /// Report date, `MM/DD/YYYY`
    pub date: String,
}

impl FetchQuery {
    /// Build the query for the report date containing `now` in `timezone`
    pub fn for_instant(access_token: impl Into<String>, now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            access_token: access_token.into(),
            date: now.with_timezone(&timezone).format(QUERY_DATE_FORMAT).to_string(),
        }
    }
}

/// Source of raw record batches
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one batch
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Record>>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "source"
    }
}
