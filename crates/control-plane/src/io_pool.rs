//! Bounded pool for blocking-prone I/O.
//!
//! Every object storage and cluster scheduler call goes through the pool so a
//! slow backend cannot pile up unbounded in-flight requests. [`IoPool::run`]
//! holds one permit and cuts the call off after the configured timeout.
//! [`IoPool::run_with_permit`] is for multi-step workflows that time out each
//! step themselves and must finish their own cleanup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct IoPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl IoPool {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Run `fut` under a permit, failing with `Infrastructure` on timeout.
    ///
    /// `operation` names the call in logs and in the timeout error.
    pub async fn run<T, E, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let _permit = self.acquire().await?;

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "I/O call timed out");
                Err(AppError::Infrastructure(format!(
                    "{} timed out after {}s",
                    operation,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Run `fut` under a permit without an outer timeout.
    pub async fn run_with_permit<T, E, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let _permit = self.acquire().await?;
        fut.await.map_err(Into::into)
    }

    async fn acquire(&self) -> AppResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("I/O pool is closed".to_string()))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
