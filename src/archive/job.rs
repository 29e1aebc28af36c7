//! Archive job bookkeeping.

use chrono::NaiveDate;
use object_store::path::Path;
use std::path::PathBuf;

/// Lifecycle of an archive job.
///
/// `Pending -> Packed -> Uploaded -> Cleaned` on success. A job stops at
/// `PackFailed` or `UploadFailed` otherwise, with the day file left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Packed,
    Uploaded,
    Cleaned,
    PackFailed,
    UploadFailed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Packed => "packed",
            JobState::Uploaded => "uploaded",
            JobState::Cleaned => "cleaned",
            JobState::PackFailed => "pack_failed",
            JobState::UploadFailed => "upload_failed",
        }
    }
}

/// One day's trip from local file to remote object.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub date: NaiveDate,
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
    pub remote_key: Path,
    pub state: JobState,
}

impl ArchiveJob {
    pub(crate) fn new(
        date: NaiveDate,
        source_path: PathBuf,
        archive_path: PathBuf,
        remote_key: Path,
    ) -> Self {
        Self {
            date,
            source_path,
            archive_path,
            remote_key,
            state: JobState::Pending,
        }
    }

    /// Move to `next`, tracing the transition.
    pub(crate) fn advance(&mut self, next: JobState) {
        tracing::debug!(
            date = %self.date,
            from = self.state.as_str(),
            to = next.as_str(),
            "Archive job transition"
        );
        self.state = next;
    }
}
