//! Periodic progress log.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Read-only view of the ingest position shared with the reporter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Raw timestamp text of the latest record seen.
    pub current_date: Option<String>,
    /// Records appended since startup.
    pub message_count: u64,
}

/// Log the latest snapshot every `interval` until `shutdown` fires.
///
/// Nothing is logged until a record with a timestamp has been seen.
pub fn spawn_reporter(
    mut progress: watch::Receiver<ProgressSnapshot>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = progress.borrow_and_update().clone();
                    if let Some(current_date) = snapshot.current_date {
                        info!(
                            "Current progress: {} with {} messages read",
                            current_date, snapshot.message_count
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_logs_latest_snapshot() {
        let (logs, _guard) = capture();
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        let shutdown = CancellationToken::new();
        let handle = spawn_reporter(rx, Duration::from_secs(10), shutdown.clone());

        for count in 1..=3 {
            tx.send_replace(ProgressSnapshot {
                current_date: Some("02/Jan/2024:03:00:00.000".to_string()),
                message_count: count,
            });
        }
        tokio::time::sleep(Duration::from_secs(15)).await;

        shutdown.cancel();
        handle.await.unwrap();

        let text = logs.text();
        assert!(text.contains("Current progress: 02/Jan/2024:03:00:00.000 with 3 messages read"));
        assert!(!text.contains("with 1 messages read"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_is_silent_before_first_record() {
        let (logs, _guard) = capture();
        let (_tx, rx) = watch::channel(ProgressSnapshot::default());
        let shutdown = CancellationToken::new();
        let handle = spawn_reporter(rx, Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;

        shutdown.cancel();
        handle.await.unwrap();

        assert!(!logs.text().contains("Current progress"));
    }
}
