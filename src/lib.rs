//! kafka-archiver: archives a Kafka topic into daily zip files on object
//! storage.
//!
//! Records are appended to one local file per day, keyed by the timestamp
//! carried in each record. When the stream moves past a day (and past a short
//! grace period into the next one), the previous day's file is zipped,
//! uploaded and removed locally.
//!
//! # Example
//!
//! ```ignore
//! use kafka_archiver::{Config, run_pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_file("archiver.yaml")?;
//! let stats = run_pipeline(config, CancellationToken::new()).await?;
//! println!("Shipped {} archives", stats.archives_shipped);
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod rollover;
pub mod signal;
pub mod sink;
pub mod source;
pub mod storage;

pub use archive::{ArchiveJob, ArchiveShipper, JobState};
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, ProgressSnapshot, run_pipeline};
pub use rollover::{RolloverDecision, RolloverDetector};
pub use sink::ActiveFileWriter;
pub use storage::{ArchiveUploader, StorageProvider};
