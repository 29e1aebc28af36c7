//! Remote storage for finished archives.
//!
//! Wraps an `object_store` backend (S3, or a local directory for development
//! and tests) behind [`StorageProvider`], and exposes the single operation the
//! archive shipper needs through the [`ArchiveUploader`] trait.

mod local;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::{MultipartId, ObjectStore, PutPayload, WriteMultipart};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::config::UploadSettings;
use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, ReadLocalSnafu, StorageError};
use crate::metrics::events::{
    ActiveMultipartParts, MultipartUploadCompleted, RequestStatus, StorageOperation,
    StorageRequest, StorageRequestDuration,
};

pub use local::LocalConfig;
pub use s3::S3Config;

/// Uploads a local file to remote storage.
///
/// The shipper depends on this trait rather than on [`StorageProvider`] so
/// that upload failures can be exercised without a real bucket.
#[async_trait]
pub trait ArchiveUploader: Send + Sync {
    /// Whether an object is already stored under `key`.
    async fn exists(&self, key: &Path) -> Result<bool, StorageError>;

    /// Upload the file at `local` under `key`. Returns only once the remote
    /// store has acknowledged the write.
    async fn upload_file(&self, key: &Path, local: &std::path::Path)
    -> Result<(), StorageError>;
}

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    /// Only S3 supports explicit part numbering; local filesystem does not.
    pub(crate) multipart_store: Option<Arc<dyn MultipartStore>>,
    pub(crate) canonical_url: String,
    pub(crate) upload: UploadSettings,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
}

fn matchers() -> &'static [(Backend, Vec<Regex>)] {
    static MATCHERS: OnceLock<Vec<(Backend, Vec<Regex>)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("storage URL pattern must compile"))
                .collect::<Vec<_>>()
        };
        vec![
            (
                Backend::S3,
                compile(&[S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]),
            ),
            (Backend::Local, compile(&[FILE_URI, FILE_URL, FILE_PATH])),
        ]
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, patterns) in matchers() {
            if let Some(matches) = patterns.iter().find_map(|r| r.captures(url)) {
                return match backend {
                    Backend::S3 => Ok(Self::parse_s3(matches)),
                    Backend::Local => Ok(Self::parse_local(matches)),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: regex::Captures) -> Self {
        let bucket = matches["bucket"].to_string();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{}://{}:{}", protocol, endpoint.as_str(), port)
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_local(matches: regex::Captures) -> Self {
        let path = &matches["path"];
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        BackendConfig::Local(LocalConfig { path })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
        max_retries: usize,
        upload: UploadSettings,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => {
                Self::construct_s3(config, options, max_retries, upload).await
            }
            BackendConfig::Local(config) => Self::construct_local(config, upload).await,
        }
    }

    /// The URL the provider resolved to, for logging.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;

        record_request(StorageOperation::Get, result.is_ok(), start);

        result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// List object keys under the configured prefix.
    pub async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let start = Instant::now();
        let prefix = self.config.key().cloned();
        let skip = prefix.as_ref().map(|p| p.parts().count()).unwrap_or_default();

        let result: Result<Vec<_>, _> = self
            .object_store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.parts().skip(skip).collect::<Path>().to_string())
            .try_collect()
            .await;

        record_request(StorageOperation::List, result.is_ok(), start);

        let mut keys = result.context(ObjectStoreSnafu)?;
        keys.sort();
        Ok(keys)
    }

    /// Whether an object exists at `path`.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&self.qualify_path(path)).await;

        match result {
            Ok(_) => {
                record_request(StorageOperation::Head, true, start);
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => {
                record_request(StorageOperation::Head, true, start);
                Ok(false)
            }
            Err(source) => {
                record_request(StorageOperation::Head, false, start);
                Err(StorageError::ObjectStore { source })
            }
        }
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;

        record_request(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Upload a local file.
    ///
    /// Files below `min_multipart_size` go up in a single PUT. Larger files
    /// are read in `part_size` chunks, so at most `max_concurrent_parts`
    /// chunks are held in memory at once.
    pub async fn put_file(&self, path: &Path, local: &std::path::Path) -> Result<(), StorageError> {
        let read_context = || ReadLocalSnafu {
            path: local.to_path_buf(),
        };
        let mut file = File::open(local).await.context(read_context())?;
        let size = file.metadata().await.context(read_context())?.len();

        let UploadSettings {
            part_size,
            min_multipart_size,
            ..
        } = self.upload;

        if size < min_multipart_size as u64 || part_size == 0 {
            let mut buf = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buf).await.context(read_context())?;
            return self.put_payload(path, PutPayload::from(buf)).await;
        }

        debug!(
            "Starting multipart upload for {} ({} bytes, part size {})",
            path, size, part_size
        );
        match &self.multipart_store {
            Some(store) => self.put_parts(store.clone(), path, file, local).await?,
            None => self.put_buffered(path, file, local).await?,
        }
        emit!(MultipartUploadCompleted);
        debug!("Completed multipart upload for {}", path);
        Ok(())
    }

    /// Upload numbered parts in parallel through the backend's multipart API.
    /// The upload is aborted if any part or the completion fails.
    async fn put_parts(
        &self,
        multipart_store: Arc<dyn MultipartStore>,
        path: &Path,
        file: File,
        local: &std::path::Path,
    ) -> Result<(), StorageError> {
        let UploadSettings {
            part_size,
            max_concurrent_parts,
            ..
        } = self.upload;
        let qualified_path = Arc::new(self.qualify_path(path).into_owned());

        let create_start = Instant::now();
        let create_result = multipart_store.create_multipart(&qualified_path).await;
        record_request(
            StorageOperation::CreateMultipart,
            create_result.is_ok(),
            create_start,
        );
        let multipart_id = Arc::new(create_result.context(ObjectStoreSnafu)?);

        let local = local.to_path_buf();
        let chunks = futures::stream::try_unfold((file, 0usize), move |(mut file, idx)| {
            let local = local.clone();
            async move {
                let chunk = read_chunk(&mut file, part_size)
                    .await
                    .context(ReadLocalSnafu { path: local })?;
                Ok::<_, StorageError>(chunk.map(|data| ((idx, data), (file, idx + 1))))
            }
        });

        let active_parts = Arc::new(AtomicUsize::new(0));
        let uploaded: Result<Vec<(usize, PartId)>, StorageError> = chunks
            .map_ok(|(idx, data)| {
                let multipart_store = multipart_store.clone();
                let qualified_path = qualified_path.clone();
                let multipart_id = multipart_id.clone();
                let active_parts = active_parts.clone();
                async move {
                    let count = active_parts.fetch_add(1, Ordering::Relaxed) + 1;
                    emit!(ActiveMultipartParts { count });

                    let part_start = Instant::now();
                    let result = multipart_store
                        .put_part(&qualified_path, &multipart_id, idx, data.into())
                        .await;
                    record_request(StorageOperation::PutPart, result.is_ok(), part_start);

                    let count = active_parts.fetch_sub(1, Ordering::Relaxed) - 1;
                    emit!(ActiveMultipartParts { count });

                    let part_id = result.context(ObjectStoreSnafu)?;
                    debug!("Uploaded part {}", idx + 1);
                    Ok::<_, StorageError>((idx, part_id))
                }
            })
            .try_buffer_unordered(max_concurrent_parts.max(1))
            .try_collect()
            .await;

        let mut results = match uploaded {
            Ok(results) => results,
            Err(e) => {
                abort_parts(multipart_store.as_ref(), &qualified_path, &multipart_id).await;
                return Err(e);
            }
        };

        // Parts may complete out of order
        results.sort_by_key(|(idx, _)| *idx);
        let part_ids: Vec<PartId> = results.into_iter().map(|(_, id)| id).collect();

        let complete_start = Instant::now();
        let complete_result = multipart_store
            .complete_multipart(&qualified_path, &multipart_id, part_ids)
            .await;
        record_request(
            StorageOperation::CompleteMultipart,
            complete_result.is_ok(),
            complete_start,
        );

        if let Err(source) = complete_result {
            abort_parts(multipart_store.as_ref(), &qualified_path, &multipart_id).await;
            return Err(StorageError::ObjectStore { source });
        }
        Ok(())
    }

    /// Stream a file through the store's generic multipart writer, for
    /// backends without numbered parts.
    async fn put_buffered(
        &self,
        path: &Path,
        mut file: File,
        local: &std::path::Path,
    ) -> Result<(), StorageError> {
        let UploadSettings {
            part_size,
            max_concurrent_parts,
            ..
        } = self.upload;
        let qualified_path = self.qualify_path(path);

        let upload = self
            .object_store
            .put_multipart(&qualified_path)
            .await
            .context(ObjectStoreSnafu)?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);

        let written: Result<(), StorageError> = async {
            while let Some(data) = read_chunk(&mut file, part_size)
                .await
                .context(ReadLocalSnafu {
                    path: local.to_path_buf(),
                })?
            {
                writer
                    .wait_for_capacity(max_concurrent_parts.max(1))
                    .await
                    .context(ObjectStoreSnafu)?;
                writer.write(&data);
            }
            Ok(())
        }
        .await;

        if let Err(e) = written {
            if let Err(abort) = writer.abort().await {
                warn!("Failed to abort multipart upload for {}: {}", path, abort);
            }
            return Err(e);
        }

        let start = Instant::now();
        let result = writer.finish().await;
        record_request(StorageOperation::CompleteMultipart, result.is_ok(), start);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveUploader for StorageProvider {
    async fn exists(&self, key: &Path) -> Result<bool, StorageError> {
        StorageProvider::exists(self, key).await
    }

    async fn upload_file(
        &self,
        key: &Path,
        local: &std::path::Path,
    ) -> Result<(), StorageError> {
        self.put_file(key, local).await
    }
}

/// Read up to `part_size` bytes. `None` at end of file.
async fn read_chunk(file: &mut File, part_size: usize) -> std::io::Result<Option<Bytes>> {
    let mut buf = Vec::with_capacity(part_size);
    (&mut *file)
        .take(part_size as u64)
        .read_to_end(&mut buf)
        .await?;
    Ok((!buf.is_empty()).then(|| Bytes::from(buf)))
}

async fn abort_parts(store: &dyn MultipartStore, path: &Path, id: &MultipartId) {
    let start = Instant::now();
    let result = store.abort_multipart(path, id).await;
    record_request(StorageOperation::AbortMultipart, result.is_ok(), start);
    match result {
        Ok(()) => debug!("Aborted multipart upload for {}", path),
        Err(e) => warn!("Failed to abort multipart upload for {}: {}", path, e),
    }
}

fn record_request(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}
