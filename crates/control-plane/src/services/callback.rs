//! Authenticated status reports from notebook runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::tokens_match;
use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionStatus, StatusFields};
use crate::result_ext::ResultExt;
use crate::store::ExecutionRecords;

/// Body of `POST /executions/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusCallback {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_notebook: Option<String>,
    #[serde(default)]
    pub output_html: Option<String>,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StatusCallback {
    pub fn validate(&self) -> AppResult<()> {
        match self.status {
            ExecutionStatus::Running | ExecutionStatus::Completed | ExecutionStatus::Failed => {}
            other => {
                return Err(AppError::Validation(format!(
                    "Runners may only report running, completed or failed, got {}",
                    other
                )))
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(AppError::Validation(
                    "end_time must not be earlier than start_time".to_string(),
                ));
            }
        }
        if matches!(&self.outputs, Some(v) if !v.is_object()) {
            return Err(AppError::Validation("outputs must be a JSON object".to_string()));
        }
        Ok(())
    }

    fn into_fields(self) -> StatusFields {
        let now = Utc::now();
        let started_at = match (self.start_time, self.status) {
            (Some(start), _) => Some(start),
            (None, ExecutionStatus::Running) => Some(now),
            (None, _) => None,
        };
        let completed_at = match (self.end_time, self.status.is_terminal()) {
            (Some(end), true) => Some(end),
            (None, true) => Some(now),
            (_, false) => None,
        };
        StatusFields {
            error: self.error,
            output_notebook: self.output_notebook,
            output_html: self.output_html,
            outputs: self.outputs,
            started_at,
            completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    pub status: &'static str,
    pub execution_id: Uuid,
}

/// Applies runner status reports after checking the per-execution token.
#[derive(Clone)]
pub struct CallbackGateway {
    records: ExecutionRecords,
}

impl CallbackGateway {
    pub fn new(records: ExecutionRecords) -> Self {
        Self { records }
    }

    /// Check `presented` against the token issued for `execution_id`.
    pub async fn validate(&self, execution_id: Uuid, presented: &str) -> AppResult<Execution> {
        let execution = self.records.get(execution_id).await?;
        if !tokens_match(&execution.callback_token, presented) {
            warn!(execution_id = %execution_id, "Rejected status callback with invalid token");
            return Err(AppError::Auth("Invalid callback token".to_string()));
        }
        Ok(execution)
    }

    /// Authenticate, validate and apply one status report.
    pub async fn apply_update(
        &self,
        execution_id: Uuid,
        presented: &str,
        update: StatusCallback,
    ) -> AppResult<CallbackAck> {
        self.validate(execution_id, presented).await?;
        update.validate()?;

        let status = update.status;
        let execution = self
            .records
            .transition(execution_id, status, update.into_fields())
            .await
            .log(format!("applying {} report", status))?;
        info!(
            execution_id = %execution_id,
            status = %execution.status,
            "Applied runner status report"
        );

        Ok(CallbackAck {
            status: "updated",
            execution_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::execution::{fixtures, Owner};
    use crate::notify::testing::RecordingNotifier;
    use crate::store::MemoryExecutionStore;

    async fn setup() -> (CallbackGateway, ExecutionRecords, Execution) {
        let records = ExecutionRecords::new(
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(RecordingNotifier::default()),
        );
        let execution = Execution::pending(fixtures::new_execution(Owner::user("alice").unwrap(), "h"));
        records.create(&execution).await.unwrap();
        records
            .transition(execution.id, ExecutionStatus::Submitted, StatusFields::default())
            .await
            .unwrap();
        (CallbackGateway::new(records.clone()), records, execution)
    }

    fn report(status: ExecutionStatus) -> StatusCallback {
        StatusCallback {
            status,
            error: None,
            output_notebook: None,
            output_html: None,
            outputs: None,
            start_time: None,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn test_running_then_completed() {
        let (gateway, records, execution) = setup().await;
        let token = execution.callback_token.clone();

        let ack = gateway
            .apply_update(execution.id, &token, report(ExecutionStatus::Running))
            .await
            .unwrap();
        assert_eq!(ack.status, "updated");
        let running = records.get(execution.id).await.unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.started_at.is_some());

        let completed = StatusCallback {
            output_html: Some(format!("outputs/{}/report.html", execution.id)),
            outputs: Some(json!({"rows": 12})),
            ..report(ExecutionStatus::Completed)
        };
        gateway.apply_update(execution.id, &token, completed).await.unwrap();
        let stored = records.get(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.outputs, Some(json!({"rows": 12})));
        assert_eq!(stored.started_at, running.started_at);
    }

    #[tokio::test]
    async fn test_bad_token_rejected_without_change() {
        let (gateway, records, execution) = setup().await;
        let err = gateway
            .apply_update(execution.id, "not-the-token", report(ExecutionStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
        assert_eq!(
            records.get(execution.id).await.unwrap().status,
            ExecutionStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_unknown_execution_is_not_found() {
        let (gateway, _, execution) = setup().await;
        let err = gateway
            .apply_update(Uuid::new_v4(), &execution.callback_token, report(ExecutionStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_runner_states() {
        let (gateway, _, execution) = setup().await;
        for status in [ExecutionStatus::Cancelled, ExecutionStatus::Pending, ExecutionStatus::Submitted] {
            let err = gateway
                .apply_update(execution.id, &execution.callback_token, report(status))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_rejects_inverted_times() {
        let (gateway, _, execution) = setup().await;
        let start = Utc::now();
        let update = StatusCallback {
            start_time: Some(start),
            end_time: Some(start - Duration::seconds(5)),
            ..report(ExecutionStatus::Completed)
        };
        assert!(matches!(
            gateway.apply_update(execution.id, &execution.callback_token, update).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_report_after_terminal_is_conflict() {
        let (gateway, records, execution) = setup().await;
        let token = execution.callback_token.clone();
        gateway
            .apply_update(execution.id, &token, report(ExecutionStatus::Completed))
            .await
            .unwrap();

        let err = gateway
            .apply_update(execution.id, &token, report(ExecutionStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            records.get(execution.id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_explicit_times_are_recorded() {
        let (gateway, records, execution) = setup().await;
        let start = Utc::now() - Duration::minutes(3);
        let end = Utc::now();
        let update = StatusCallback {
            error: Some("ZeroDivisionError".into()),
            start_time: Some(start),
            end_time: Some(end),
            ..report(ExecutionStatus::Failed)
        };
        gateway
            .apply_update(execution.id, &execution.callback_token, update)
            .await
            .unwrap();
        let stored = records.get(execution.id).await.unwrap();
        assert_eq!(stored.started_at, Some(start));
        assert_eq!(stored.completed_at, Some(end));
        assert_eq!(stored.error.as_deref(), Some("ZeroDivisionError"));
    }
}
