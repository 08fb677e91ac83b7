//! Adapter configuration model.
//!
//! Every field has a default so a config file only needs the sections it
//! overrides plus the `[[jobs]]` list.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::jobs::{validate_identifier, validate_jobs, JobEntry};

/// Complete adapter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub clickhouse: ClickHouseConfig,
    pub writer: WriterConfig,
    pub reader: ReaderConfig,
    pub shutdown: ShutdownConfig,
    pub reload: ReloadConfig,
    pub jobs: Vec<JobEntry>,
}

/// Connection settings for the ClickHouse HTTP interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    /// Base URL of the HTTP interface.
    pub url: String,
    /// Database holding every job table.
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout applied to every store call.
    pub timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8123".to_string(),
            database: "metrics".to_string(),
            user: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

impl ClickHouseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Batching writer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Samples per insert transaction. Also the capacity of each job's
    /// delivery queue.
    pub batch_size: usize,
    /// Flush a partial batch once its oldest sample has waited this long.
    /// Zero disables time-based flushing.
    pub flush_interval_secs: u64,
    /// Upper bound on how long ingestion may wait for room in a full queue.
    /// Unset means wait indefinitely.
    pub enqueue_timeout_ms: Option<u64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            flush_interval_secs: 30,
            enqueue_timeout_ms: None,
        }
    }
}

impl WriterConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        self.enqueue_timeout_ms.map(Duration::from_millis)
    }
}

/// Read-path settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Table queried when a read cannot be narrowed to a single job.
    pub table: String,
    /// Maximum number of buckets per query range.
    pub max_samples: i64,
    /// Lower bound on the bucket width, in seconds.
    pub min_period_secs: i64,
    /// Quantile computed over each bucket.
    pub quantile: f64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            table: "samples".to_string(),
            max_samples: 8192,
            min_period_secs: 10,
            quantile: 0.75,
        }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for writers to drain their queues.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Live reload of the job list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// How often the config file's modification time is checked.
    /// Zero disables reloading.
    pub poll_interval_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl ReloadConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

impl AdapterConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AdapterConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), jobs = config.jobs.len(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                path: "<inline>".into(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clickhouse.url.is_empty() {
            return Err(ConfigError::invalid("clickhouse.url", "must not be empty"));
        }
        validate_identifier("clickhouse.database", &self.clickhouse.database)?;
        if self.clickhouse.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "clickhouse.timeout_secs",
                "must be at least 1",
            ));
        }

        if self.writer.batch_size == 0 {
            return Err(ConfigError::invalid("writer.batch_size", "must be at least 1"));
        }

        validate_identifier("reader.table", &self.reader.table)?;
        if self.reader.max_samples < 1 {
            return Err(ConfigError::invalid(
                "reader.max_samples",
                format!("must be at least 1, got {}", self.reader.max_samples),
            ));
        }
        if self.reader.min_period_secs < 0 {
            return Err(ConfigError::invalid(
                "reader.min_period_secs",
                "must not be negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.reader.quantile) {
            return Err(ConfigError::invalid(
                "reader.quantile",
                format!("must be in [0.0, 1.0], got {}", self.reader.quantile),
            ));
        }

        validate_jobs(&self.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AdapterConfig::from_toml_str("").unwrap();
        assert_eq!(config, AdapterConfig::default());
        assert_eq!(config.writer.batch_size, 8192);
        assert_eq!(config.reader.quantile, 0.75);
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(10));
        assert!(config.writer.enqueue_timeout().is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = AdapterConfig::from_toml_str(
            r#"
[clickhouse]
url = "http://ch:8123"

[writer]
batch_size = 500
enqueue_timeout_ms = 250

[[jobs]]
name = "node"
table = "node_samples"
"#,
        )
        .unwrap();
        assert_eq!(config.clickhouse.url, "http://ch:8123");
        assert_eq!(config.clickhouse.database, "metrics");
        assert_eq!(config.writer.batch_size, 500);
        assert_eq!(config.writer.flush_interval_secs, 30);
        assert_eq!(
            config.writer.enqueue_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.jobs.len(), 1);
    }

    #[test]
    fn zero_interval_disables_flush_and_reload() {
        let config = AdapterConfig::from_toml_str(
            "[writer]\nflush_interval_secs = 0\n[reload]\npoll_interval_secs = 0\n",
        )
        .unwrap();
        assert!(config.writer.flush_interval().is_none());
        assert!(config.reload.poll_interval().is_none());
    }

    #[test]
    fn rejects_zero_batch() {
        let err = AdapterConfig::from_toml_str("[writer]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "writer.batch_size"));
    }

    #[test]
    fn rejects_bad_sample_budget() {
        let err = AdapterConfig::from_toml_str("[reader]\nmax_samples = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "reader.max_samples"));
    }

    #[test]
    fn rejects_quantile_out_of_range() {
        assert!(AdapterConfig::from_toml_str("[reader]\nquantile = 1.5\n").is_err());
    }

    #[test]
    fn rejects_injected_database_name() {
        let err =
            AdapterConfig::from_toml_str("[clickhouse]\ndatabase = \"m; DROP\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier { .. }));
    }

    #[test]
    fn parse_error_reports_inline_path() {
        let err = AdapterConfig::from_toml_str("[writer\n").unwrap_err();
        assert!(err.to_string().contains("<inline>"));
    }
}
