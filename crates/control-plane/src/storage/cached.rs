use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{ObjectMeta, ObjectStorage, ResultCache, StorageError, StoredObject};

/// Read-through cache in front of another [`ObjectStorage`].
///
/// A cached read is served only after a `head` call confirms the backing
/// object's ETag still matches the one recorded at caching time. Any
/// mismatch, or a failed `head`, refetches and re-caches. Writes and deletes
/// made through this wrapper invalidate the key.
pub struct CachedStorage {
    inner: Arc<dyn ObjectStorage>,
    cache: ResultCache<StoredObject>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn ObjectStorage>, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: ResultCache::new(capacity, ttl),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    async fn revalidate(&self, key: &str, cached_etag: Option<&str>) -> bool {
        let Some(cached_etag) = cached_etag else {
            return false;
        };
        match self.inner.head(key).await {
            Ok(meta) => meta.e_tag.as_deref() == Some(cached_etag),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache revalidation failed, refetching");
                false
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for CachedStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn read(&self, key: &str) -> Result<StoredObject, StorageError> {
        if let Some((object, etag)) = self.cache.get(key) {
            if self.revalidate(key, etag.as_deref()).await {
                debug!(key = %key, "Cache hit");
                return Ok(object);
            }
            debug!(key = %key, "Cached object is stale");
            self.cache.invalidate(key);
        }

        let object = self.inner.read(key).await?;
        self.cache
            .put(key, object.clone(), object.meta.e_tag.clone());
        Ok(object)
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        self.inner.head(key).await
    }

    async fn write(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let result = self.inner.write(key, bytes).await;
        self.cache.invalidate(key);
        result
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let result = self.inner.delete(key).await;
        self.cache.invalidate(key);
        result
    }
}
