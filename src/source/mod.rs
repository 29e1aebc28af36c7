//! Record sources and timestamp extraction.
//!
//! The ingest loop reads raw payloads through the [`RecordSource`] trait:
//! [`KafkaSource`] in production, [`ChannelSource`] when records are produced
//! in-process.

pub mod channel;
pub mod kafka;
pub mod timestamp;

use async_trait::async_trait;

use crate::error::SourceError;

pub use channel::ChannelSource;
pub use kafka::KafkaSource;
pub use timestamp::{ExtractedTimestamp, TimestampExtractor};

/// A stream of raw record payloads.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait up to the source's poll timeout and return the records that
    /// arrived, possibly none. `Ok(None)` means the stream has ended.
    async fn poll_batch(&mut self) -> Result<Option<Vec<String>>, SourceError>;
}
