//! The ingest loop.
//!
//! Pulls batches from the record source and, for each record in order:
//! extracts its timestamp, feeds the rollover detector, ships closed days and
//! appends the record to its day file. Archive jobs run inline, so a slow
//! upload holds back consumption.

mod delay;
mod reporter;

pub use delay::{Delay, NoDelay, TokioDelay};
pub use reporter::{ProgressSnapshot, spawn_reporter};

use chrono::NaiveDate;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveShipper;
use crate::config::{ArchiveConfig, Config};
use crate::emit;
use crate::error::{ArchiveError, PipelineError, PipelineStorageSnafu, SourceSnafu};
use crate::metrics::events::{
    ArchiveJobFinished, ArchiveOutcome, ArchiveTrigger, BatchPolled, RecordSkipped,
    RecordsIngested, WatermarkAdvanced,
};
use crate::rollover::{RolloverDecision, RolloverDetector, day_key};
use crate::sink::ActiveFileWriter;
use crate::source::{KafkaSource, RecordSource, TimestampExtractor};
use crate::storage::{ArchiveUploader, StorageProvider};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches_polled: u64,
    pub records_ingested: u64,
    pub records_skipped: u64,
    pub archives_shipped: u64,
    pub archives_failed: u64,
}

/// Consumes records and keeps day files archived.
pub struct Pipeline<S> {
    source: S,
    extractor: TimestampExtractor,
    detector: RolloverDetector,
    writer: ActiveFileWriter,
    shipper: Arc<ArchiveShipper>,
    delay: Arc<dyn Delay>,
    settle_delay: Duration,
    progress: watch::Sender<ProgressSnapshot>,
    message_count: u64,
    stats: PipelineStats,
    shutdown: CancellationToken,
}

impl<S: RecordSource> Pipeline<S> {
    /// Build a pipeline writing under `archive.work_directory` and shipping
    /// through `uploader`.
    pub fn new(
        source: S,
        archive: &ArchiveConfig,
        uploader: Arc<dyn ArchiveUploader>,
        key_prefix: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        let writer = ActiveFileWriter::new(archive.work_directory.clone());
        let shipper = Arc::new(ArchiveShipper::new(writer.clone(), uploader, key_prefix));
        let (progress, _) = watch::channel(ProgressSnapshot::default());

        Self {
            source,
            extractor: TimestampExtractor::new(archive.timestamp_field),
            detector: RolloverDetector::new(archive.grace_hours),
            writer,
            shipper,
            delay: Arc::new(TokioDelay),
            settle_delay: archive.settle_delay(),
            progress,
            message_count: 0,
            stats: PipelineStats::default(),
            shutdown,
        }
    }

    /// Replace the pause taken around rollover archiving.
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    /// Receiver for progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn detector(&self) -> &RolloverDetector {
        &self.detector
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Run until the source ends or shutdown is requested.
    ///
    /// Shutdown is checked between batches; a batch that has been polled is
    /// always processed to the end.
    pub async fn run(mut self) -> Result<PipelineStats, PipelineError> {
        info!("Starting ingest loop");
        self.writer.prepare().await?;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, stopping ingest loop");
                break;
            }

            let Some(batch) = self.source.poll_batch().await.context(SourceSnafu)? else {
                info!("Record stream ended");
                break;
            };
            self.process_batch(batch).await?;
        }

        info!("Ingest loop completed: {:?}", self.stats);
        Ok(self.stats)
    }

    /// Process a polled batch in order.
    pub async fn process_batch(&mut self, batch: Vec<String>) -> Result<(), PipelineError> {
        self.stats.batches_polled += 1;
        emit!(BatchPolled { size: batch.len() });
        if batch.is_empty() {
            return Ok(());
        }

        let before = self.stats.records_ingested;
        for record in &batch {
            self.process_record(record).await?;
        }

        let ingested = self.stats.records_ingested - before;
        if ingested > 0 {
            emit!(RecordsIngested { count: ingested });
        }
        Ok(())
    }

    /// Handle a single record.
    ///
    /// A record without a usable timestamp is dropped and changes nothing.
    /// Failed archive jobs are logged and left for a later attempt; only a
    /// failed append is returned as an error.
    pub async fn process_record(&mut self, record: &str) -> Result<(), PipelineError> {
        let extracted = match self.extractor.extract(record) {
            Ok(extracted) => extracted,
            Err(e) => {
                debug!("Skipping record: {}", e);
                self.stats.records_skipped += 1;
                emit!(RecordSkipped { reason: e.reason() });
                return Ok(());
            }
        };

        let decision = self.detector.observe(extracted.timestamp, &extracted.raw);
        if let RolloverDecision::Roll {
            ship_date,
            recovery_check_date,
        } = decision
        {
            info!(
                timestamp = %extracted.timestamp,
                ship_date = %ship_date,
                "Day rolled over"
            );
            emit!(WatermarkAdvanced {
                timestamp_secs: extracted.timestamp.and_utc().timestamp(),
            });

            self.ship(ship_date, ArchiveTrigger::Rollover).await;
            self.delay.wait(self.settle_delay).await;
            self.publish();
            self.delay.wait(self.settle_delay).await;

            if self.writer.exists(recovery_check_date).await {
                warn!(date = %recovery_check_date, "Found leftover day file, archiving it");
                self.ship(recovery_check_date, ArchiveTrigger::Recovery).await;
            }
        }

        self.writer
            .append(day_key(&extracted.timestamp), record)
            .await?;
        self.message_count += 1;
        self.stats.records_ingested += 1;
        self.publish();
        Ok(())
    }

    async fn ship(&mut self, day: NaiveDate, trigger: ArchiveTrigger) {
        let outcome = match self.shipper.pack_and_send(day).await {
            Ok(job) => {
                info!(date = %day, key = %job.remote_key, trigger = trigger.as_str(), "Archive job finished");
                self.stats.archives_shipped += 1;
                ArchiveOutcome::Shipped
            }
            Err(e) => {
                error!(date = %day, trigger = trigger.as_str(), "Archive job failed: {}", e);
                self.stats.archives_failed += 1;
                outcome_of(&e)
            }
        };
        emit!(ArchiveJobFinished { trigger, outcome });
    }

    fn publish(&self) {
        self.progress.send_replace(ProgressSnapshot {
            current_date: self.detector.current_date_string().map(str::to_string),
            message_count: self.message_count,
        });
    }
}

fn outcome_of(error: &ArchiveError) -> ArchiveOutcome {
    match error {
        ArchiveError::Upload { .. } | ArchiveError::NoFreeKey { .. } => {
            ArchiveOutcome::UploadFailed
        }
        ArchiveError::Cleanup { .. } => ArchiveOutcome::CleanupFailed,
        ArchiveError::SourceMissing { .. }
        | ArchiveError::Pack { .. }
        | ArchiveError::Zip { .. }
        | ArchiveError::PackTask { .. } => ArchiveOutcome::PackFailed,
    }
}

/// Wire up storage, the Kafka source and the reporter, then run the ingest
/// loop until shutdown.
pub async fn run_pipeline(
    config: Config,
    shutdown: CancellationToken,
) -> Result<PipelineStats, PipelineError> {
    let storage = StorageProvider::for_url_with_options(
        &config.storage.url,
        config.storage.storage_options.clone(),
        config.storage.max_retries,
        config.storage.upload_settings(),
    )
    .await
    .context(PipelineStorageSnafu)?;
    info!(url = storage.canonical_url(), "Archive storage ready");

    let source = KafkaSource::new(&config.source).context(SourceSnafu)?;
    let pipeline = Pipeline::new(
        source,
        &config.archive,
        Arc::new(storage),
        config.storage.key_prefix.clone(),
        shutdown.clone(),
    );

    let reporter = (config.reporter.interval_secs > 0).then(|| {
        spawn_reporter(
            pipeline.subscribe(),
            Duration::from_secs(config.reporter.interval_secs),
            shutdown.clone(),
        )
    });

    let result = pipeline.run().await;

    shutdown.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::source::ChannelSource;
    use async_trait::async_trait;
    use object_store::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingUploader {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveUploader for RecordingUploader {
        async fn exists(&self, key: &Path) -> Result<bool, StorageError> {
            Ok(self.keys.lock().unwrap().contains(&key.to_string()))
        }

        async fn upload_file(&self, key: &Path, _: &std::path::Path) -> Result<(), StorageError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Delay for RecordingDelay {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn archive_config(dir: &TempDir) -> ArchiveConfig {
        ArchiveConfig {
            work_directory: dir.path().to_path_buf(),
            timestamp_field: 6,
            grace_hours: 2,
            settle_delay_ms: 1000,
        }
    }

    fn record(ts: &str) -> String {
        format!("10.0.0.1 - - svc GET /index.html [{ts}] 200 512")
    }

    fn pipeline(
        dir: &TempDir,
        uploader: Arc<RecordingUploader>,
        delay: Arc<RecordingDelay>,
    ) -> Pipeline<ChannelSource> {
        let (_tx, source) = ChannelSource::new(1, Duration::from_millis(10));
        Pipeline::new(
            source,
            &archive_config(dir),
            uploader,
            "",
            CancellationToken::new(),
        )
        .with_delay(delay)
    }

    #[tokio::test]
    async fn test_rollover_ships_previous_day_with_settle_pauses() {
        let dir = TempDir::new().unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let delay = Arc::new(RecordingDelay::default());
        let mut pipeline = pipeline(&dir, uploader.clone(), delay.clone());
        let progress = pipeline.subscribe();

        pipeline
            .process_batch(vec![
                record("01/Jan/2024:23:00:00.000"),
                record("02/Jan/2024:03:00:00.000"),
            ])
            .await
            .unwrap();

        assert_eq!(
            *uploader.keys.lock().unwrap(),
            vec!["data-2024-01-01.log.zip".to_string()]
        );
        assert_eq!(
            *delay.waits.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(1)]
        );
        assert!(!dir.path().join("data-2024-01-01.log").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data-2024-01-02.log")).unwrap(),
            format!("{}\n", record("02/Jan/2024:03:00:00.000"))
        );

        let snapshot = progress.borrow().clone();
        assert_eq!(snapshot.message_count, 2);
        assert_eq!(
            snapshot.current_date.as_deref(),
            Some("02/Jan/2024:03:00:00.000")
        );
        assert_eq!(pipeline.stats().archives_shipped, 1);
    }

    #[tokio::test]
    async fn test_malformed_record_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let delay = Arc::new(RecordingDelay::default());
        let mut pipeline = pipeline(&dir, uploader, delay);
        let progress = pipeline.subscribe();

        pipeline.process_record("not a log line").await.unwrap();

        assert_eq!(pipeline.stats().records_skipped, 1);
        assert_eq!(pipeline.detector().last_observed(), None);
        assert_eq!(pipeline.detector().current_date_string(), None);
        assert_eq!(*progress.borrow(), ProgressSnapshot::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rollover_recovers_file_from_two_days_back() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data-2023-12-31.log"), "orphan\n").unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let mut pipeline = pipeline(&dir, uploader.clone(), Arc::new(RecordingDelay::default()));

        pipeline
            .process_batch(vec![
                record("01/Jan/2024:23:00:00.000"),
                record("02/Jan/2024:03:00:00.000"),
            ])
            .await
            .unwrap();

        assert_eq!(
            *uploader.keys.lock().unwrap(),
            vec![
                "data-2024-01-01.log.zip".to_string(),
                "data-2023-12-31.log.zip".to_string(),
            ]
        );
        assert!(!dir.path().join("data-2023-12-31.log").exists());
    }

    #[tokio::test]
    async fn test_missing_ship_file_is_logged_and_loop_continues() {
        let dir = TempDir::new().unwrap();
        let uploader = Arc::new(RecordingUploader::default());
        let mut pipeline = pipeline(&dir, uploader.clone(), Arc::new(RecordingDelay::default()));

        // the first record sets the watermark but its file is removed before the roll
        pipeline
            .process_record(&record("01/Jan/2024:23:00:00.000"))
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join("data-2024-01-01.log")).unwrap();

        pipeline
            .process_record(&record("02/Jan/2024:03:00:00.000"))
            .await
            .unwrap();

        assert!(uploader.keys.lock().unwrap().is_empty());
        assert_eq!(pipeline.stats().archives_failed, 1);
        assert_eq!(pipeline.stats().records_ingested, 2);
    }

    #[tokio::test]
    async fn test_run_stops_when_source_ends() {
        let dir = TempDir::new().unwrap();
        let (tx, source) = ChannelSource::new(4, Duration::from_millis(10));
        let pipeline = Pipeline::new(
            source,
            &archive_config(&dir),
            Arc::new(RecordingUploader::default()),
            "",
            CancellationToken::new(),
        )
        .with_delay(Arc::new(NoDelay));

        tx.send(vec![record("01/Jan/2024:10:00:00.000"), "junk".to_string()])
            .await
            .unwrap();
        drop(tx);

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.records_ingested, 1);
        assert_eq!(stats.records_skipped, 1);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let (_tx, source) = ChannelSource::new(1, Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let pipeline = Pipeline::new(
            source,
            &archive_config(&dir),
            Arc::new(RecordingUploader::default()),
            "",
            shutdown,
        );
        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats, PipelineStats::default());
    }

    #[test]
    fn test_outcome_classification() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let missing = ArchiveError::SourceMissing {
            date,
            path: "x".into(),
        };
        assert_eq!(outcome_of(&missing), ArchiveOutcome::PackFailed);
        let upload = ArchiveError::Upload {
            source: StorageError::InvalidUrl { url: "x".into() },
            date,
            key: "k".into(),
        };
        assert_eq!(outcome_of(&upload), ArchiveOutcome::UploadFailed);
    }
}
