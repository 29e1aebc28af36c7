//! Local day files.
//!
//! Records are appended to one plain-text file per day under the work
//! directory: `data-YYYY-MM-DD.log`. Each append opens the file, writes and
//! closes it again, so no handle outlives a single record.

use chrono::NaiveDate;
use snafu::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::emit;
use crate::error::{AppendSnafu, PipelineError, WorkDirectorySnafu};
use crate::metrics::events::BytesAppended;

const FILE_PREFIX: &str = "data-";
const FILE_SUFFIX: &str = ".log";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Extension added to a day file when it is packed.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Appends records to per-day files.
#[derive(Debug, Clone)]
pub struct ActiveFileWriter {
    work_dir: PathBuf,
}

impl ActiveFileWriter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Create the work directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.work_dir)
            .await
            .context(WorkDirectorySnafu {
                path: self.work_dir.clone(),
            })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Name of the file holding `day`'s records.
    pub fn file_name(day: NaiveDate) -> String {
        format!("{FILE_PREFIX}{}{FILE_SUFFIX}", day.format(DATE_FORMAT))
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.work_dir.join(Self::file_name(day))
    }

    /// Whether a file for `day` is present.
    pub async fn exists(&self, day: NaiveDate) -> bool {
        fs::try_exists(self.path_for(day)).await.unwrap_or(false)
    }

    /// Append `record` to `day`'s file, terminated by a newline.
    ///
    /// Returns the number of bytes written.
    pub async fn append(&self, day: NaiveDate, record: &str) -> Result<u64, PipelineError> {
        let path = self.path_for(day);
        let written = write_line(&path, record)
            .await
            .context(AppendSnafu { path: path.clone() })?;

        debug!(path = %path.display(), bytes = written, "Appended record");
        emit!(BytesAppended { bytes: written });
        Ok(written)
    }
}

async fn write_line(path: &Path, record: &str) -> io::Result<u64> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut written = record.len() as u64;
    file.write_all(record.as_bytes()).await?;
    if !record.ends_with('\n') {
        file.write_all(b"\n").await?;
        written += 1;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_file_layout() {
        let writer = ActiveFileWriter::new("/var/lib/archiver");
        assert_eq!(
            writer.path_for(day(2)),
            PathBuf::from("/var/lib/archiver/data-2024-01-02.log")
        );
    }

    #[tokio::test]
    async fn test_append_creates_and_extends_day_file() {
        let dir = TempDir::new().unwrap();
        let writer = ActiveFileWriter::new(dir.path());

        assert!(!writer.exists(day(1)).await);
        assert_eq!(writer.append(day(1), "first").await.unwrap(), 6);
        writer.append(day(1), "second\n").await.unwrap();
        writer.append(day(2), "other day").await.unwrap();

        assert!(writer.exists(day(1)).await);
        let content = std::fs::read_to_string(writer.path_for(day(1))).unwrap();
        assert_eq!(content, "first\nsecond\n");
        let content = std::fs::read_to_string(writer.path_for(day(2))).unwrap();
        assert_eq!(content, "other day\n");
    }

    #[tokio::test]
    async fn test_prepare_creates_nested_work_directory() {
        let dir = TempDir::new().unwrap();
        let writer = ActiveFileWriter::new(dir.path().join("a/b"));
        writer.prepare().await.unwrap();
        writer.append(day(1), "x").await.unwrap();
        assert!(writer.exists(day(1)).await);
    }

    #[tokio::test]
    async fn test_append_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let writer = ActiveFileWriter::new(dir.path().join("absent"));
        let err = writer.append(day(1), "x").await.unwrap_err();
        assert!(matches!(err, PipelineError::Append { .. }));
    }
}
