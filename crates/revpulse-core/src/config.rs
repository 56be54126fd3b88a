//! Configuration management for RevPulse
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! then `REVPULSE__SECTION__KEY` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{AgencyDirectory, AggregationSpec, DerivedFormat};
use crate::pipeline::TableLayout;
use crate::sink::RetryPolicy;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "REVPULSE";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Partner API configuration
    pub source: SourceConfig,

    /// Backend store (read side) configuration
    pub store: StoreConfig,

    /// Persistence sink configuration
    pub sink: SinkConfig,

    /// Refresh scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Snapshot cache configuration
    pub cache: CacheConfig,

    /// Report configuration
    pub report: ReportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("revpulse").required(false));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        parse_url("source.endpoint", &self.source.endpoint)?;
        parse_url("source.geo_endpoint", &self.source.geo_endpoint)?;
        parse_url("store.endpoint", &self.store.endpoint)?;
        parse_url("sink.endpoint", &self.sink.endpoint)?;
        self.source.tz()?;
        if self.sink.chunk_size == 0 {
            return Err(Error::config("sink.chunk_size must be greater than zero"));
        }
        if self.scheduler.interval.is_zero() {
            return Err(Error::config("scheduler.interval must be greater than zero"));
        }
        if self.cache.report_key.trim().is_empty() {
            return Err(Error::config("cache.report_key must not be empty"));
        }
        Ok(())
    }
}

fn parse_url(name: &str, value: &str) -> Result<url::Url> {
    url::Url::parse(value)
        .map_err(|e| Error::config(format!("{name} is not a valid URL ({value}): {e}")))
}

/// Partner API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Realtime-by-channel report endpoint
    pub endpoint: String,
    /// Realtime-by-geo report endpoint
    pub geo_endpoint: String,
    /// Access credential sent as `accessToken`
    pub access_token: String,
    /// Time zone the report date is computed in
    pub timezone: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl SourceConfig {
    /// Parsed reporting time zone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| Error::config(format!("unknown time zone {}: {e}", self.timezone)))
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://partners.inuvo.com/analytics/GetAdsenseOnlineRealtimeByChannel"
                .to_string(),
            geo_endpoint: "https://partners.inuvo.com/analytics/GetAdsenseOnlineByGeoRealtimeByChannel"
                .to_string(),
            access_token: String::new(),
            timezone: "America/Los_Angeles".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Backend store (read side) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Endpoint returning previously persisted rows
    pub endpoint: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://apparentlybackends.onrender.com/revenue".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Persistence sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Endpoint accepting JSON arrays of records
    pub endpoint: String,
    /// Batches larger than this are split into chunks of this size
    pub chunk_size: usize,
    /// What happens to records of a failed chunk
    pub retry: RetryPolicy,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3003/revenues".to_string(),
            chunk_size: 100,
            retry: RetryPolicy::None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Refresh scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Align the first cycle to the next wall-clock hour
    pub align_to_hour: bool,
    /// Command channel capacity
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            align_to_hour: true,
            command_buffer: 16,
        }
    }
}

/// Snapshot cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (platform cache dir when unset)
    pub dir: Option<PathBuf>,
    /// Key the last-known-good batch is stored under
    pub report_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            report_key: "hourlyReports".to_string(),
        }
    }
}

/// Report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Grouping, sums, derived ratios and agency lookup
    pub aggregation: AggregationSpec,
    /// Field the leaderboard and chart rank by
    pub rank_field: String,
    /// Leaderboard size
    pub top_n: usize,
    /// Chart title
    pub chart_title: String,
    /// Chart dataset label
    pub chart_label: String,
    /// Field summed into total earnings
    pub earnings_field: String,
    /// Field summed into total clicks
    pub clicks_field: String,
    /// Field summed into total estimated clicks
    pub estimated_clicks_field: String,
    /// Detail table layout
    pub table: TableLayout,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let agencies =
            AgencyDirectory::new([("6864116138", "Travado"), ("8177198441", "EveryKnown")]);
        Self {
            aggregation: AggregationSpec::new("tkid")
                .sum("estimated_earnings")
                .sum("ad_requests")
                .sum("matched_ad_requests")
                .sum("impressions")
                .sum("individual_ad_impressions")
                .sum("clicks")
                .sum("estimated_clicks")
                .derive("rpc", "estimated_earnings", "clicks", DerivedFormat::Currency)
                .lookup("agid", "agency", agencies),
            rank_field: "estimated_earnings".to_string(),
            top_n: 8,
            chart_title: "Top 8 Ads by Estimated Earnings".to_string(),
            chart_label: "Estimated Earnings ($)".to_string(),
            earnings_field: "estimated_earnings".to_string(),
            clicks_field: "clicks".to_string(),
            estimated_clicks_field: "estimated_clicks".to_string(),
            table: TableLayout::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sink.chunk_size, 100);
        assert_eq!(config.scheduler.interval, Duration::from_secs(3600));
        assert_eq!(config.source.tz().unwrap(), chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sink.chunk_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.source.timezone = "Mars/Olympus".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sink.endpoint = "not a url".into();
        assert!(config.validate().unwrap_err().to_string().contains("sink.endpoint"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[source]
access_token = "token-from-file"

[sink]
chunk_size = 50
retry = "next_cycle"

[scheduler]
interval = "15m"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();

        assert_eq!(config.source.access_token, "token-from-file");
        assert_eq!(config.sink.chunk_size, 50);
        assert_eq!(config.sink.retry, RetryPolicy::NextCycle);
        assert_eq!(config.scheduler.interval, Duration::from_secs(15 * 60));
        assert_eq!(config.report.top_n, 8);
    }
}
