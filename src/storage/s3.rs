//! S3 storage backend implementation.

use object_store::aws::AmazonS3Builder;
use object_store::multipart::MultipartStore;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::UploadSettings;
use crate::error::{S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

/// Transient failures (throttling, 5xx, connection resets) are retried with
/// exponential backoff before an upload is reported as failed.
fn retry_config(max_retries: usize) -> RetryConfig {
    let mut retry = RetryConfig::default();
    retry.max_retries = max_retries;
    retry
}

impl StorageProvider {
    pub(super) async fn construct_s3(
        config: S3Config,
        options: HashMap<String, String>,
        max_retries: usize,
        upload: UploadSettings,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);

        for (key, value) in &options {
            builder = builder.with_config(key.parse().context(S3ConfigSnafu)?, value.clone());
        }

        builder = builder.with_retry(retry_config(max_retries));

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let canonical_url = match (&config.region, &config.endpoint) {
            (_, Some(endpoint)) => format!("s3::{}/{}", endpoint, config.bucket),
            (Some(region), _) => format!("https://s3.{}.amazonaws.com/{}", region, config.bucket),
            _ => format!("https://s3.amazonaws.com/{}", config.bucket),
        };

        let canonical_url = match &config.key {
            Some(key) => format!("{}/{}", canonical_url, key),
            None => canonical_url,
        };

        let s3_store = Arc::new(builder.build().context(S3ConfigSnafu)?);
        let multipart_store: Option<Arc<dyn MultipartStore>> = Some(s3_store.clone());
        let object_store: Arc<dyn ObjectStore> = s3_store;

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            multipart_store,
            canonical_url,
            upload,
        })
    }
}
