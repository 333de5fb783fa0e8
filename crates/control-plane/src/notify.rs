//! Completion notifications for user-owned executions.
//!
//! Dispatch is fire-and-forget: a notification runs on its own task and its
//! failure is logged, never returned to the code that changed the record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionStatus};

/// What a recipient is told about a finished execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionNotice {
    /// User id of the owner; downstream resolves contact details.
    pub recipient: String,
    pub execution_id: Uuid,
    pub notebook_path: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub output_notebook: Option<String>,
    pub output_html: Option<String>,
}

impl ExecutionNotice {
    /// Notice for `execution`, if it warrants one.
    ///
    /// Only user-owned executions that completed or failed notify.
    pub fn for_execution(execution: &Execution) -> Option<Self> {
        let recipient = execution.owner.user_id()?;
        if !matches!(
            execution.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        ) {
            return None;
        }
        Some(Self {
            recipient: recipient.to_string(),
            execution_id: execution.id,
            notebook_path: execution.notebook_path.clone(),
            status: execution.status,
            error: execution.error.clone(),
            output_notebook: execution.output_notebook.clone(),
            output_html: execution.output_html.clone(),
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &ExecutionNotice) -> AppResult<()>;
}

/// Send `notice` on a background task.
pub fn dispatch(notifier: Arc<dyn Notifier>, notice: ExecutionNotice) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&notice).await {
            warn!(
                execution_id = %notice.execution_id,
                recipient = %notice.recipient,
                error = %e,
                "Failed to send execution notification"
            );
        }
    });
}

/// Writes notices to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notice: &ExecutionNotice) -> AppResult<()> {
        info!(
            execution_id = %notice.execution_id,
            recipient = %notice.recipient,
            status = %notice.status,
            notebook_path = %notice.notebook_path,
            "Execution finished"
        );
        Ok(())
    }
}

/// POSTs notices as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notice: &ExecutionNotice) -> AppResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| AppError::Infrastructure(format!("Notification webhook unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Infrastructure(format!(
                "Notification webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
