//! In-process record source backed by a tokio channel.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::RecordSource;
use crate::error::SourceError;

/// Receives batches pushed through an `mpsc` channel.
///
/// The stream ends once every sender is dropped and the buffered batches
/// have been drained.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<String>>,
    poll_timeout: Duration,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize, poll_timeout: Duration) -> (mpsc::Sender<Vec<String>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx, poll_timeout })
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn poll_batch(&mut self) -> Result<Option<Vec<String>>, SourceError> {
        match tokio::time::timeout(self.poll_timeout, self.rx.recv()).await {
            Ok(batch) => Ok(batch),
            Err(_) => Ok(Some(Vec::new())),
        }
    }
}
