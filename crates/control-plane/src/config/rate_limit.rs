//! Admission control configuration.

use serde::Deserialize;
use std::time::Duration;

/// Rate limit configuration loaded from environment variables.
///
/// Environment variables are prefixed with `RATE_LIMIT_`:
/// - `RATE_LIMIT_ENABLED`: Toggle admission control (default: true)
/// - `RATE_LIMIT_CLIENT_LIMIT`: Requests per client per window (default: 5000)
/// - `RATE_LIMIT_EXECUTIONS_LIMIT`: Execution creations per window, all clients (default: 100)
/// - `RATE_LIMIT_WINDOW_SECONDS`: Sliding window length (default: 3600)
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_client_limit")]
    pub client_limit: usize,

    #[serde(default = "default_executions_limit")]
    pub executions_limit: usize,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_client_limit() -> usize {
    5000
}

fn default_executions_limit() -> usize {
    100
}

fn default_window_seconds() -> u64 {
    3600
}

impl RateLimitConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `RATE_LIMIT_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("RATE_LIMIT_").from_env::<RateLimitConfig>()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            client_limit: default_client_limit(),
            executions_limit: default_executions_limit(),
            window_seconds: default_window_seconds(),
        }
    }
}
