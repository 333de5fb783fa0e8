//! Application configuration for the NBForge Control Plane server.

use serde::Deserialize;
use std::time::Duration;

/// Where execution records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `NBFORGE_`:
/// - `NBFORGE_HOST`: Server bind address (default: "0.0.0.0")
/// - `NBFORGE_PORT`: Server port (default: 8000)
/// - `NBFORGE_API_URL`: Base URL runners use for status callbacks
/// - `NBFORGE_STORE`: `postgres` or `memory` (default: postgres)
/// - `NBFORGE_LOG_JSON`: Emit JSON formatted logs (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Public API base URL handed to runners, including `/api/v1`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_store")]
    pub store: StoreBackend,

    /// Interpreter version used when neither request nor notebook names one
    #[serde(default = "default_python_version")]
    pub default_python_version: String,

    #[serde(default = "default_cpu_milli")]
    pub default_cpu_milli: i32,

    #[serde(default = "default_memory_mib")]
    pub default_memory_mib: i32,

    /// Result cache capacity (entries)
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Result cache entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Concurrent storage/scheduler calls allowed at once
    #[serde(default = "default_io_pool_size")]
    pub io_pool_size: usize,

    /// Per-call timeout for storage/scheduler calls in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_seconds: u64,

    /// Completion notifications are POSTed here when set
    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    #[serde(default)]
    pub log_json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_server_name() -> String {
    "nbforge-control-plane".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_store() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_python_version() -> String {
    "3.10".to_string()
}

fn default_cpu_milli() -> i32 {
    1000
}

fn default_memory_mib() -> i32 {
    2048
}

fn default_cache_size() -> usize {
    100
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_io_pool_size() -> usize {
    32
}

fn default_io_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `NBFORGE_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("NBFORGE_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            server_name: default_server_name(),
            api_url: default_api_url(),
            store: default_store(),
            default_python_version: default_python_version(),
            default_cpu_milli: default_cpu_milli(),
            default_memory_mib: default_memory_mib(),
            cache_size: default_cache_size(),
            cache_ttl_seconds: default_cache_ttl(),
            io_pool_size: default_io_pool_size(),
            io_timeout_seconds: default_io_timeout(),
            notification_webhook_url: None,
            log_json: false,
        }
    }
}
