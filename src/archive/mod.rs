//! Packing and shipping of closed day files.
//!
//! A job zips `data-YYYY-MM-DD.log` into `data-YYYY-MM-DD.log.zip`, uploads
//! the archive and removes both local files once the upload is confirmed.
//! Jobs never overlap: the shipper holds a lock for the whole job.

mod job;

pub use job::{ArchiveJob, JobState};

use chrono::NaiveDate;
use object_store::path::Path;
use snafu::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path as LocalPath;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::emit;
use crate::error::{
    ArchiveError, CleanupSnafu, NoFreeKeySnafu, PackSnafu, PackTaskSnafu, SourceMissingSnafu,
    UploadSnafu, ZipSnafu,
};
use crate::metrics::events::{ArchivePacked, ArchiveUploadCompleted};
use crate::sink::{ARCHIVE_EXTENSION, ActiveFileWriter};
use crate::storage::ArchiveUploader;

/// Upper bound on archive versions kept for a single day.
const MAX_ARCHIVE_VERSIONS: u32 = 1000;

/// Ships day files to remote storage, one job at a time.
pub struct ArchiveShipper {
    writer: ActiveFileWriter,
    uploader: Arc<dyn ArchiveUploader>,
    key_prefix: String,
    lock: Mutex<()>,
}

impl ArchiveShipper {
    pub fn new(
        writer: ActiveFileWriter,
        uploader: Arc<dyn ArchiveUploader>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            uploader,
            key_prefix: key_prefix.into(),
            lock: Mutex::new(()),
        }
    }

    /// Remote key of `day`'s archive. Version 0 is the plain
    /// `data-<day>.log.zip`; later versions hold records that arrived after
    /// the day was already shipped, as `data-<day>.log.<version>.zip`.
    fn remote_key(&self, day: NaiveDate, version: u32) -> Path {
        let name = ActiveFileWriter::file_name(day);
        let key = match version {
            0 => format!("{}{name}.{ARCHIVE_EXTENSION}", self.key_prefix),
            n => format!("{}{name}.{n}.{ARCHIVE_EXTENSION}", self.key_prefix),
        };
        Path::from(key)
    }

    /// First version of `day`'s key that is not stored remotely yet.
    async fn free_key(&self, day: NaiveDate) -> Result<Path, ArchiveError> {
        for version in 0..MAX_ARCHIVE_VERSIONS {
            let key = self.remote_key(day, version);
            let taken = self.uploader.exists(&key).await.context(UploadSnafu {
                date: day,
                key: key.to_string(),
            })?;
            if !taken {
                return Ok(key);
            }
        }
        NoFreeKeySnafu { date: day }.fail()
    }

    /// Pack `day`'s file, upload it and clean up.
    ///
    /// The day file is only deleted after the upload has been confirmed. A
    /// failed pack or upload leaves it in place for a later attempt.
    pub async fn pack_and_send(&self, day: NaiveDate) -> Result<ArchiveJob, ArchiveError> {
        let _guard = self.lock.lock().await;

        let source_path = self.writer.path_for(day);
        let archive_name = format!(
            "{}.{ARCHIVE_EXTENSION}",
            ActiveFileWriter::file_name(day)
        );
        let archive_path = self.writer.work_dir().join(&archive_name);
        let mut job = ArchiveJob::new(
            day,
            source_path,
            archive_path,
            self.remote_key(day, 0),
        );

        if !self.writer.exists(day).await {
            job.advance(JobState::PackFailed);
            return SourceMissingSnafu {
                date: day,
                path: job.source_path.clone(),
            }
            .fail();
        }

        info!(date = %day, source = %job.source_path.display(), "Packing day file");
        let start = Instant::now();
        if let Err(e) = pack(day, &job.source_path, &job.archive_path).await {
            error!(date = %day, "Failed to pack day file: {}", e);
            remove_quietly(&job.archive_path).await;
            job.advance(JobState::PackFailed);
            return Err(e);
        }
        let packed_bytes = tokio::fs::metadata(&job.archive_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        emit!(ArchivePacked {
            duration: start.elapsed(),
            bytes: packed_bytes,
        });
        job.advance(JobState::Packed);

        match self.free_key(day).await {
            Ok(key) => {
                if key != job.remote_key {
                    warn!(
                        date = %day,
                        key = %key,
                        "Day was already archived, shipping late records separately"
                    );
                }
                job.remote_key = key;
            }
            Err(e) => {
                error!(
                    date = %day,
                    "Cannot pick a remote key, keeping {}: {}",
                    job.source_path.display(),
                    e
                );
                remove_quietly(&job.archive_path).await;
                job.advance(JobState::UploadFailed);
                return Err(e);
            }
        }

        info!(date = %day, key = %job.remote_key, bytes = packed_bytes, "Uploading archive");
        let start = Instant::now();
        let uploaded = self
            .uploader
            .upload_file(&job.remote_key, &job.archive_path)
            .await;
        emit!(ArchiveUploadCompleted {
            duration: start.elapsed(),
        });
        if let Err(source) = uploaded {
            error!(
                date = %day,
                key = %job.remote_key,
                "Upload failed, keeping {}: {}",
                job.source_path.display(),
                source
            );
            remove_quietly(&job.archive_path).await;
            job.advance(JobState::UploadFailed);
            return Err(source).context(UploadSnafu {
                date: day,
                key: job.remote_key.to_string(),
            });
        }
        job.advance(JobState::Uploaded);

        for path in [&job.archive_path, &job.source_path] {
            tokio::fs::remove_file(path)
                .await
                .context(CleanupSnafu {
                    date: day,
                    path: path.clone(),
                })?;
        }
        job.advance(JobState::Cleaned);

        info!(date = %day, key = %job.remote_key, "Archived day file");
        Ok(job)
    }
}

/// Write a single-entry deflate archive of `source` to `target`.
async fn pack(day: NaiveDate, source: &LocalPath, target: &LocalPath) -> Result<(), ArchiveError> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || pack_blocking(&source, &target))
        .await
        .context(PackTaskSnafu { date: day })?
}

fn pack_blocking(source: &LocalPath, target: &LocalPath) -> Result<(), ArchiveError> {
    let entry_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let input = File::open(source).context(PackSnafu {
        path: source.to_path_buf(),
    })?;
    let output = File::create(target).context(PackSnafu {
        path: target.to_path_buf(),
    })?;

    let mut zip = ZipWriter::new(BufWriter::new(output));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    zip.start_file(entry_name, options).context(ZipSnafu {
        path: target.to_path_buf(),
    })?;
    io::copy(&mut BufReader::new(input), &mut zip).context(PackSnafu {
        path: source.to_path_buf(),
    })?;

    let mut output = zip.finish().context(ZipSnafu {
        path: target.to_path_buf(),
    })?;
    io::Write::flush(&mut output).context(PackSnafu {
        path: target.to_path_buf(),
    })?;
    Ok(())
}

async fn remove_quietly(path: &LocalPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove partial archive: {}", e),
    }
}
