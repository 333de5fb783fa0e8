//! Row model for the `nbforge.execution` table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::execution::{Execution, ExecutionHashes, ExecutionStatus, Owner, ResourceRequest};

/// One row of `nbforge.execution`.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub notebook_path: String,
    pub parameters: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_notebook: Option<String>,
    pub output_html: Option<String>,
    pub outputs: Option<Value>,
    pub python_version: String,
    pub cpu_milli: i32,
    pub memory_mib: i32,
    pub requirements: Value,
    pub notebook_hash: String,
    pub parameters_hash: String,
    pub execution_hash: String,
    pub callback_token: String,
    pub user_id: Option<String>,
    pub service_principal_id: Option<String>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = AppError;

    fn try_from(row: ExecutionRow) -> AppResult<Self> {
        let status = row
            .status
            .parse::<ExecutionStatus>()
            .map_err(|e| AppError::Internal(format!("Execution {}: {}", row.id, e)))?;
        let parameters = match row.parameters {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            other => {
                return Err(AppError::Internal(format!(
                    "Execution {}: parameters must be an object, found {}",
                    row.id, other
                )))
            }
        };
        let requirements: Vec<String> = serde_json::from_value(row.requirements)?;
        let owner = Owner::from_columns(row.user_id, row.service_principal_id)
            .map_err(|e| AppError::Internal(format!("Execution {}: {}", row.id, e)))?;

        Ok(Execution {
            id: row.id,
            notebook_path: row.notebook_path,
            notebook_name: None,
            parameters,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            resources: ResourceRequest {
                cpu_milli: row.cpu_milli,
                memory_mib: row.memory_mib,
                python_version: row.python_version,
                requirements,
            },
            hashes: ExecutionHashes {
                notebook_hash: row.notebook_hash,
                parameters_hash: row.parameters_hash,
                execution_hash: row.execution_hash,
            },
            callback_token: row.callback_token,
            owner,
            error: row.error,
            output_notebook: row.output_notebook,
            output_html: row.output_html,
            outputs: row.outputs,
        })
    }
}
