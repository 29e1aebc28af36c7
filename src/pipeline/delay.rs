//! Pauses taken between archive steps.

use async_trait::async_trait;
use std::time::Duration;

/// Something that can wait for a duration.
///
/// The ingest loop waits through this trait so tests can skip or record the
/// pauses instead of sleeping.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn wait(&self, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_delay_sleeps() {
        let start = Instant::now();
        TokioDelay.wait(Duration::from_secs(1)).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_returns_immediately() {
        let start = Instant::now();
        NoDelay.wait(Duration::from_secs(1)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
