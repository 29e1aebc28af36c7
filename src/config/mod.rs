//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files, with environment
//! variable interpolation applied before parsing.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyBrokersSnafu, EmptyGroupIdSnafu, EmptyStorageUrlSnafu, EmptyTopicSnafu,
    EmptyWorkDirectorySnafu, EnvInterpolationSnafu, InvalidGraceHoursSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroBatchSizeSnafu,
};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for the archiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    /// Metrics and health endpoint configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Progress reporter configuration (optional).
    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Comma-separated bootstrap servers, e.g. "kafka-1:9092,kafka-2:9092".
    pub brokers: String,

    /// Topic to archive.
    pub topic: String,

    /// Consumer group id.
    pub group_id: String,

    /// Client id reported to the brokers (default: "kafka-archiver").
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Start from the earliest offset when the group has no committed offset.
    /// When false, the broker's default reset policy applies.
    #[serde(default)]
    pub start_from_earliest: bool,

    /// How long a single poll waits for records (default: 100ms).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound on records returned by a single poll (default: 500).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Additional librdkafka properties (security.protocol, sasl.*, ...).
    #[serde(default)]
    pub consumer_options: HashMap<String, String>,
}

fn default_client_id() -> String {
    "kafka-archiver".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_batch_size() -> usize {
    500
}

impl SourceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Local buffering and rollover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding the per-day `data-YYYY-MM-DD.log` files.
    pub work_directory: PathBuf,

    /// Position of the bracketed timestamp in a space-separated record (default: 6).
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: usize,

    /// A new day is only trusted once records are later than this hour (default: 2).
    #[serde(default = "default_grace_hours")]
    pub grace_hours: u32,

    /// Pause around the watermark update after shipping a day (default: 1000ms).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_timestamp_field() -> usize {
    6
}

fn default_grace_hours() -> u32 {
    2
}

fn default_settle_delay_ms() -> u64 {
    1000
}

impl ArchiveConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Remote storage configuration for finished archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Destination bucket or directory.
    /// Examples: "s3://my-bucket", "/local/path/archives"
    pub url: String,

    /// Prepended verbatim to the archive file name to form the object key.
    #[serde(default)]
    pub key_prefix: String,

    /// Storage options (credentials, region, endpoint, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Retries for transient request failures (default: 10).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Target size per multipart part in MB (default: 32)
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: usize,

    /// Minimum file size in MB before using multipart upload (default: 5)
    /// Files smaller than this use single PUT
    #[serde(default = "default_min_multipart_size_mb")]
    pub min_multipart_size_mb: usize,

    /// Maximum concurrent parts per multipart upload (default: 8)
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,
}

fn default_max_retries() -> usize {
    10
}

fn default_part_size_mb() -> usize {
    32
}

fn default_min_multipart_size_mb() -> usize {
    5
}

fn default_max_concurrent_parts() -> usize {
    8
}

/// Upload tuning derived from [`StorageConfig`].
#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub part_size: usize,
    pub min_multipart_size: usize,
    pub max_concurrent_parts: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            part_size: default_part_size_mb() * MB,
            min_multipart_size: default_min_multipart_size_mb() * MB,
            max_concurrent_parts: default_max_concurrent_parts(),
        }
    }
}

impl StorageConfig {
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            part_size: self.part_size_mb * MB,
            min_multipart_size: self.min_multipart_size_mb * MB,
            max_concurrent_parts: self.max_concurrent_parts.max(1),
        }
    }
}

/// Metrics configuration for the Prometheus and health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the HTTP endpoint is started (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the HTTP server (default: "0.0.0.0:8080").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Periodic progress logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Seconds between progress lines; 0 disables the reporter (default: 10).
    #[serde(default = "default_report_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_report_interval_secs(),
        }
    }
}

fn default_report_interval_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            let result = vars::interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.brokers.trim().is_empty(), EmptyBrokersSnafu);
        ensure!(!self.source.topic.trim().is_empty(), EmptyTopicSnafu);
        ensure!(!self.source.group_id.trim().is_empty(), EmptyGroupIdSnafu);
        ensure!(self.source.max_batch_size > 0, ZeroBatchSizeSnafu);
        ensure!(
            !self.archive.work_directory.as_os_str().is_empty(),
            EmptyWorkDirectorySnafu
        );
        ensure!(
            self.archive.grace_hours < 24,
            InvalidGraceHoursSnafu {
                hours: self.archive.grace_hours
            }
        );
        ensure!(!self.storage.url.trim().is_empty(), EmptyStorageUrlSnafu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  brokers: "localhost:9092"
  topic: "access-logs"
  group_id: "archiver"

archive:
  work_directory: "/var/lib/archiver"

storage:
  url: "s3://archive-bucket"
"#;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_yaml(MINIMAL, false).unwrap();

        assert_eq!(config.source.client_id, "kafka-archiver");
        assert!(!config.source.start_from_earliest);
        assert_eq!(config.source.poll_timeout(), Duration::from_millis(100));
        assert_eq!(config.source.max_batch_size, 500);
        assert_eq!(config.archive.timestamp_field, 6);
        assert_eq!(config.archive.grace_hours, 2);
        assert_eq!(config.archive.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.storage.key_prefix, "");
        assert_eq!(config.storage.max_retries, 10);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:8080");
        assert_eq!(config.reporter.interval_secs, 10);
    }

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
source:
  brokers: "kafka-1:9092,kafka-2:9092"
  topic: "access-logs"
  group_id: "archiver"
  start_from_earliest: true
  consumer_options:
    security.protocol: SASL_SSL

archive:
  work_directory: "/data"
  grace_hours: 4
  settle_delay_ms: 0

storage:
  url: "s3://archive-bucket"
  key_prefix: "logs/"
  storage_options:
    aws_region: eu-west-1
  part_size_mb: 16
"#;
        let config = Config::from_yaml(yaml, false).unwrap();
        assert!(config.source.start_from_earliest);
        assert_eq!(
            config.source.consumer_options.get("security.protocol"),
            Some(&"SASL_SSL".to_string())
        );
        assert_eq!(config.archive.work_directory, PathBuf::from("/data"));
        assert_eq!(config.archive.grace_hours, 4);
        assert_eq!(config.archive.settle_delay(), Duration::ZERO);
        assert_eq!(config.storage.key_prefix, "logs/");
        assert_eq!(config.storage.upload_settings().part_size, 16 * MB);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let yaml = MINIMAL.replace("\"access-logs\"", "\"\"");
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTopic));
    }

    #[test]
    fn test_grace_hours_out_of_range_rejected() {
        let yaml = MINIMAL.replace(
            "work_directory: \"/var/lib/archiver\"",
            "work_directory: \"/var/lib/archiver\"\n  grace_hours: 24",
        );
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGraceHours { hours: 24 }));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let yaml = MINIMAL.replace(
            "group_id: \"archiver\"",
            "group_id: \"archiver\"\n  max_batch_size: 0",
        );
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroBatchSize));
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let yaml = r#"
source:
  brokers: "localhost:9092"
  topic: "t"
  group_id: "g"
"#;
        let err = Config::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }
}
