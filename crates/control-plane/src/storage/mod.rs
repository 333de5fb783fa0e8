//! Object storage for notebooks and run outputs.
//!
//! Callers depend on the narrow [`ObjectStorage`] capability. The concrete
//! backend wraps `object_store` (S3 or in-memory) and [`CachedStorage`]
//! layers a revalidating [`ResultCache`] in front of it.

mod backend;
mod cache;
mod cached;

pub use backend::ObjectStoreBackend;
pub use cache::ResultCache;
pub use cached::CachedStorage;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::AppError;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Opaque content validator; changes whenever the content does.
    pub e_tag: Option<String>,
}

/// Object bytes together with the metadata they were read with.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub meta: ObjectMeta,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store error: {0}")]
    Backend(String),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object {} not found", key)),
            StorageError::Backend(msg) => AppError::Infrastructure(msg),
        }
    }
}

/// Key/value object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    async fn read(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Metadata only; used to revalidate cached reads.
    async fn head(&self, key: &str) -> Result<ObjectMeta, StorageError>;

    async fn write(&self, key: &str, bytes: Bytes) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
