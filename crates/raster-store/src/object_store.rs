//! Object storage interface for the STI index bucket (S3 compatible).

use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use sti_common::{StiError, StiResult};

/// Configuration for object storage connection.
///
/// Credentials may be omitted to fall back on the ambient AWS
/// environment (instance role, env vars).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint URL (MinIO, localstack); `None` for AWS
    pub endpoint: Option<String>,
    /// Access key ID; `None` to use the ambient environment
    pub access_key_id: Option<String>,
    /// Secret access key; `None` to use the ambient environment
    pub secret_access_key: Option<String>,
    /// Allow HTTP (for local endpoints)
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            bucket: "pangu-mvp-data".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }
}

/// Object storage client for raster data.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    pub fn new(config: &ObjectStorageConfig) -> StiResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StiError::StorageError(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an already-built store. Used by tests to substitute a
    /// `LocalFileSystem` store for S3.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StiResult<bool> {
        let location = Path::from(key);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StiError::StorageError(format!(
                "Failed to check {}: {}",
                key, e
            ))),
        }
    }

    /// Download an object to a local file, streaming.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn download_to(&self, key: &str, local_path: &std::path::Path) -> StiResult<()> {
        let location = Path::from(key);

        let result = self.store.get(&location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StiError::NotFound(key.to_string()),
            other => StiError::StorageError(format!("Failed to read {}: {}", key, other)),
        })?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = result.into_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| StiError::StorageError(format!("Download of {} failed: {}", key, e)))?
        {
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(bytes = written, "Downloaded object");
        Ok(())
    }

    /// List "folders" directly under a prefix (delimiter `/`).
    pub async fn list_common_prefixes(&self, prefix: &str) -> StiResult<Vec<String>> {
        let prefix_path = Path::from(prefix);

        let result = self
            .store
            .list_with_delimiter(Some(&prefix_path))
            .await
            .map_err(|e| StiError::StorageError(format!("List of {} failed: {}", prefix, e)))?;

        Ok(result
            .common_prefixes
            .iter()
            .map(|p| p.to_string())
            .collect())
    }
}
