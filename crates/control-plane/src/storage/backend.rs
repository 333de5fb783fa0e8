use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::info;

use super::{ObjectMeta, ObjectStorage, StorageError, StoredObject};
use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

/// [`ObjectStorage`] over any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// S3 (or S3-compatible) bucket backend.
    pub fn s3(config: &StorageConfig) -> AppResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_region(&config.region)
            .with_bucket_name(&config.bucket);

        if !config.access_key_id.is_empty() {
            builder = builder.with_access_key_id(&config.access_key_id);
        }
        if !config.secret_access_key.is_empty() {
            builder = builder.with_secret_access_key(&config.secret_access_key);
        }
        if let Some(endpoint) = config.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_allow_http(endpoint_url.starts_with("http://"))
                .with_endpoint(endpoint_url);
        }

        let store = builder
            .build()
            .map_err(|e| AppError::Config(format!("Invalid S3 configuration: {}", e)))?;

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "Storage: S3 backend"
        );

        Ok(Self::new(Arc::new(store), &config.bucket))
    }

    /// Process-local backend for tests and local development.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn to_meta(meta: object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        key: meta.location.to_string(),
        last_modified: meta.last_modified,
        size: meta.size as u64,
        e_tag: meta.e_tag,
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let prefix = Path::from(prefix);
        let objects: Vec<object_store::ObjectMeta> =
            self.store.list(Some(&prefix)).try_collect().await?;
        Ok(objects.into_iter().map(to_meta).collect())
    }

    async fn read(&self, key: &str) -> Result<StoredObject, StorageError> {
        let result = self.store.get(&Path::from(key)).await?;
        let meta = to_meta(result.meta.clone());
        let bytes = result.bytes().await?;
        Ok(StoredObject { bytes, meta })
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        Ok(to_meta(self.store.head(&Path::from(key)).await?))
    }

    async fn write(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        self.store
            .put(&Path::from(key), PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&Path::from(key)).await?;
        Ok(())
    }
}
