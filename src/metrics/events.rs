//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the archiver.
//! Events implement the `InternalEvent` trait which records the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a record is appended to its day file.
pub struct RecordsIngested {
    pub count: u64,
}

impl InternalEvent for RecordsIngested {
    fn emit(self) {
        trace!(count = self.count, "Records ingested");
        counter!("archiver_records_ingested_total").increment(self.count);
    }
}

/// Event emitted when a record is dropped because its timestamp is unusable.
pub struct RecordSkipped {
    pub reason: &'static str,
}

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!(reason = self.reason, "Record skipped");
        counter!("archiver_records_skipped_total", "reason" => self.reason).increment(1);
    }
}

/// Event emitted when bytes are appended to local day files.
pub struct BytesAppended {
    pub bytes: u64,
}

impl InternalEvent for BytesAppended {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes appended");
        counter!("archiver_bytes_appended_total").increment(self.bytes);
    }
}

/// Event emitted when a poll returns from the stream.
pub struct BatchPolled {
    pub size: usize,
}

impl InternalEvent for BatchPolled {
    fn emit(self) {
        trace!(size = self.size, "Batch polled");
        histogram!("archiver_batch_size").record(self.size as f64);
    }
}

// ============================================================================
// Archive jobs
// ============================================================================

/// Why an archive job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTrigger {
    /// The previous day was closed by a rollover.
    Rollover,
    /// An older file left behind by a previous process was found.
    Recovery,
}

impl ArchiveTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveTrigger::Rollover => "rollover",
            ArchiveTrigger::Recovery => "recovery",
        }
    }
}

/// Final outcome of an archive job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Shipped,
    PackFailed,
    UploadFailed,
    CleanupFailed,
}

impl ArchiveOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ArchiveOutcome::Shipped => "shipped",
            ArchiveOutcome::PackFailed => "pack_failed",
            ArchiveOutcome::UploadFailed => "upload_failed",
            ArchiveOutcome::CleanupFailed => "cleanup_failed",
        }
    }
}

/// Event emitted when an archive job reaches a terminal state.
pub struct ArchiveJobFinished {
    pub trigger: ArchiveTrigger,
    pub outcome: ArchiveOutcome,
}

impl InternalEvent for ArchiveJobFinished {
    fn emit(self) {
        trace!(
            trigger = self.trigger.as_str(),
            outcome = self.outcome.as_str(),
            "Archive job finished"
        );
        counter!(
            "archiver_archive_jobs_total",
            "trigger" => self.trigger.as_str(),
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a day file has been packed.
pub struct ArchivePacked {
    pub duration: Duration,
    pub bytes: u64,
}

impl InternalEvent for ArchivePacked {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            bytes = self.bytes,
            "Archive packed"
        );
        histogram!("archiver_pack_duration_seconds").record(self.duration.as_secs_f64());
        counter!("archiver_archive_bytes_total").increment(self.bytes);
    }
}

/// Event emitted when an archive upload returns.
pub struct ArchiveUploadCompleted {
    pub duration: Duration,
}

impl InternalEvent for ArchiveUploadCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Archive upload completed"
        );
        histogram!("archiver_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the rollover watermark advances to a new day.
pub struct WatermarkAdvanced {
    /// Seconds since the Unix epoch of the new watermark, read as UTC.
    pub timestamp_secs: i64,
}

impl InternalEvent for WatermarkAdvanced {
    fn emit(self) {
        trace!(timestamp_secs = self.timestamp_secs, "Watermark advanced");
        gauge!("archiver_watermark_timestamp_seconds").set(self.timestamp_secs as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Head,
    Put,
    List,
    CreateMultipart,
    PutPart,
    CompleteMultipart,
    AbortMultipart,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::CreateMultipart => "create_multipart",
            StorageOperation::PutPart => "put_part",
            StorageOperation::CompleteMultipart => "complete_multipart",
            StorageOperation::AbortMultipart => "abort_multipart",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "archiver_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "archiver_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the number of in-flight multipart parts changes.
pub struct ActiveMultipartParts {
    pub count: usize,
}

impl InternalEvent for ActiveMultipartParts {
    fn emit(self) {
        trace!(count = self.count, "Active multipart parts");
        gauge!("archiver_active_multipart_parts").set(self.count as f64);
    }
}

/// Event emitted when a multipart upload completes.
pub struct MultipartUploadCompleted;

impl InternalEvent for MultipartUploadCompleted {
    fn emit(self) {
        trace!("Multipart upload completed");
        counter!("archiver_multipart_uploads_total").increment(1);
    }
}
