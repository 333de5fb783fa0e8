//! Runner configuration.

use uuid::Uuid;

use crate::error::CallbackError;

/// Values the control plane injects into every runner workload.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Control plane API base URL, including `/api/v1`.
    pub api_url: String,

    /// Execution this workload runs.
    pub job_id: Uuid,

    /// Per-execution secret for status callbacks.
    pub callback_token: String,
}

impl RunnerConfig {
    /// Load configuration from `API_URL`, `JOB_ID` and `CALLBACK_TOKEN`.
    pub fn from_env() -> Result<Self, CallbackError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CallbackError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| CallbackError::Config(format!("{} is not set", name)))
        };

        let api_url = required("API_URL")?;
        let job_id = required("JOB_ID")?
            .trim()
            .parse()
            .map_err(|e| CallbackError::Config(format!("JOB_ID is not a UUID: {}", e)))?;
        let callback_token = required("CALLBACK_TOKEN")?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            job_id,
            callback_token,
        })
    }
}
