//! Callback error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallbackError {
    /// Connection, timeout or body decoding failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The control plane answered with a non-success status
    #[error("control plane returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
        /// Parsed `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// Required runner environment is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),
}

impl CallbackError {
    /// Transport failures, 429 and 5xx answers may succeed on a later attempt.
    /// Other client errors (bad token, illegal transition, invalid body) never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallbackError::Transport(_) => true,
            CallbackError::Status { status, .. } => *status == 429 || *status >= 500,
            CallbackError::Config(_) => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallbackError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
