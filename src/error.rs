//! Error types for the archiver using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use chrono::NaiveDate;
use snafu::prelude::*;
use std::path::PathBuf;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// Failed to read a local file before uploading it.
    #[snafu(display("Failed to read local file {}", path.display()))]
    ReadLocal {
        source: std::io::Error,
        path: PathBuf,
    },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Broker list is empty.
    #[snafu(display("Kafka brokers cannot be empty"))]
    EmptyBrokers,

    /// Topic is empty.
    #[snafu(display("Kafka topic cannot be empty"))]
    EmptyTopic,

    /// Consumer group is empty.
    #[snafu(display("Kafka consumer group id cannot be empty"))]
    EmptyGroupId,

    /// Work directory is empty.
    #[snafu(display("Work directory cannot be empty"))]
    EmptyWorkDirectory,

    /// Storage URL is empty.
    #[snafu(display("Storage URL cannot be empty"))]
    EmptyStorageUrl,

    /// Batch size must allow at least one record per poll.
    #[snafu(display("max_batch_size must be greater than zero"))]
    ZeroBatchSize,

    /// Grace period cannot span a whole day.
    #[snafu(display("grace_hours must be between 0 and 23, got {hours}"))]
    InvalidGraceHours { hours: u32 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Extract Errors ============

/// Reasons a record's timestamp could not be extracted.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// The record has fewer fields than the configured timestamp position.
    #[snafu(display("Record has no field at index {index}"))]
    MissingField { index: usize },

    /// The timestamp field is too short to carry enclosing brackets.
    #[snafu(display("Timestamp field {field:?} is not enclosed"))]
    Unenclosed { field: String },

    /// The timestamp text does not match the expected pattern.
    #[snafu(display("Cannot parse timestamp {raw:?}: {message}"))]
    Unparsable { raw: String, message: String },
}

impl ExtractError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractError::MissingField { .. } => "missing_field",
            ExtractError::Unenclosed { .. } => "unenclosed",
            ExtractError::Unparsable { .. } => "unparsable",
        }
    }
}

// ============ Archive Errors ============

/// Errors that can occur while packing and shipping a day's file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArchiveError {
    /// There is no local file for the requested day.
    #[snafu(display("No local file for {date} at {}", path.display()))]
    SourceMissing { date: NaiveDate, path: PathBuf },

    /// Writing the zip archive failed.
    #[snafu(display("Failed to pack {}", path.display()))]
    Pack {
        source: std::io::Error,
        path: PathBuf,
    },

    /// The zip encoder rejected the archive.
    #[snafu(display("Failed to encode archive {}", path.display()))]
    Zip {
        source: zip::result::ZipError,
        path: PathBuf,
    },

    /// The blocking packing task panicked or was cancelled.
    #[snafu(display("Packing task for {date} did not complete"))]
    PackTask {
        source: tokio::task::JoinError,
        date: NaiveDate,
    },

    /// Every candidate key for the day is already taken remotely.
    #[snafu(display("No free archive key left for {date}"))]
    NoFreeKey { date: NaiveDate },

    /// Upload to remote storage failed; local files were kept.
    #[snafu(display("Failed to upload archive for {date} to {key}"))]
    Upload {
        source: StorageError,
        date: NaiveDate,
        key: String,
    },

    /// The upload succeeded but a local artifact could not be removed.
    #[snafu(display("Uploaded {date} but failed to remove {}", path.display()))]
    Cleanup {
        source: std::io::Error,
        date: NaiveDate,
        path: PathBuf,
    },
}

// ============ Source Errors ============

/// Errors raised by the record stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Failed to create the Kafka consumer.
    #[snafu(display("Failed to create Kafka consumer"))]
    ConsumerCreate {
        source: rdkafka::error::KafkaError,
    },

    /// Failed to subscribe to the topic.
    #[snafu(display("Failed to subscribe to topic {topic}"))]
    Subscribe {
        source: rdkafka::error::KafkaError,
        topic: String,
    },

    /// Reading from the stream failed.
    #[snafu(display("Failed to read from Kafka"))]
    Receive {
        source: rdkafka::error::KafkaError,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Stream error. Fatal: the ingest loop stops.
    #[snafu(display("Source error"))]
    Source { source: SourceError },

    /// Failed to append a record to its day file.
    #[snafu(display("Failed to append to {}", path.display()))]
    Append {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to prepare the work directory.
    #[snafu(display("Failed to create work directory {}", path.display()))]
    WorkDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
