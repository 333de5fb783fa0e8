//! Object storage configuration.

use serde::Deserialize;

/// Which object store backs notebook reads and output writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Memory,
}

/// Storage configuration loaded from environment variables.
///
/// Environment variables are prefixed with `S3_`:
/// - `S3_BUCKET`: Bucket holding notebooks and outputs (default: "nbforge")
/// - `S3_ENDPOINT_URL`: Custom endpoint for S3-compatible stores (optional)
/// - `S3_REGION`: Region (default: "us-east-1")
/// - `S3_ACCESS_KEY_ID` / `S3_SECRET_ACCESS_KEY`: Credentials, also handed to runners
/// - `S3_BACKEND`: `s3` or `memory` (default: s3)
#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub secret_access_key: String,

    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
}

fn default_bucket() -> String {
    "nbforge".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::S3
}

impl StorageConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `S3_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("S3_").from_env::<StorageConfig>()
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("backend", &self.backend)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            endpoint_url: None,
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            backend: default_backend(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.bucket, "nbforge");
        assert_eq!(config.backend, StorageBackend::S3);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = StorageConfig {
            secret_access_key: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
