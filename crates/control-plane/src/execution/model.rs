//! The execution record and its field updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ExecutionStatus, Owner};
use crate::error::{AppError, AppResult};

/// Type-coerced notebook parameters. Key order carries no meaning.
pub type Parameters = Map<String, Value>;

/// Compute resources and environment requested for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_milli: i32,
    pub memory_mib: i32,
    pub python_version: String,
    /// Package requirement specifiers, e.g. `pandas==2.2.0`.
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Content fingerprints used for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHashes {
    pub notebook_hash: String,
    pub parameters_hash: String,
    pub execution_hash: String,
}

/// A tracked notebook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub notebook_path: String,
    /// Display name from notebook metadata; filled on read, never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_name: Option<String>,
    pub parameters: Parameters,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub resources: ResourceRequest,
    #[serde(flatten)]
    pub hashes: ExecutionHashes,
    /// Shared secret the runner presents on status callbacks.
    #[serde(skip)]
    pub callback_token: String,
    pub owner: Owner,
    pub error: Option<String>,
    pub output_notebook: Option<String>,
    pub output_html: Option<String>,
    pub outputs: Option<Value>,
}

/// Immutable fields of a new execution.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub notebook_path: String,
    pub parameters: Parameters,
    pub resources: ResourceRequest,
    pub hashes: ExecutionHashes,
    pub callback_token: String,
    pub owner: Owner,
}

impl Execution {
    /// Build a fresh `pending` record.
    pub fn pending(new: NewExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            notebook_path: new.notebook_path,
            notebook_name: None,
            parameters: new.parameters,
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            resources: new.resources,
            hashes: new.hashes,
            callback_token: new.callback_token,
            owner: new.owner,
            error: None,
            output_notebook: None,
            output_html: None,
            outputs: None,
        }
    }

    /// Move to `next`, applying `fields`.
    ///
    /// Leaves the record untouched and returns a conflict when the move is
    /// not allowed from the current state.
    pub fn apply_transition(&mut self, next: ExecutionStatus, fields: StatusFields) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Execution {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        fields.apply_to(self);
        self.status = next;
        Ok(())
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.error.is_none()
    }
}

/// Optional field updates that accompany a status transition.
///
/// Only fields that are `Some` overwrite the stored values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    pub error: Option<String>,
    pub output_notebook: Option<String>,
    pub output_html: Option<String>,
    pub outputs: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusFields {
    /// Fields for a failure recorded by the control plane itself.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finished_now() -> Self {
        Self {
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn apply_to(self, execution: &mut Execution) {
        if let Some(error) = self.error {
            execution.error = Some(error);
        }
        if let Some(output_notebook) = self.output_notebook {
            execution.output_notebook = Some(output_notebook);
        }
        if let Some(output_html) = self.output_html {
            execution.output_html = Some(output_html);
        }
        if let Some(outputs) = self.outputs {
            execution.outputs = Some(outputs);
        }
        if let Some(started_at) = self.started_at {
            execution.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            execution.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn new_execution(owner: Owner, execution_hash: &str) -> NewExecution {
        NewExecution {
            notebook_path: "notebooks/report.ipynb".to_string(),
            parameters: Parameters::new(),
            resources: ResourceRequest {
                cpu_milli: 1000,
                memory_mib: 2048,
                python_version: "3.10".to_string(),
                requirements: vec!["pandas==2.2.0".to_string()],
            },
            hashes: ExecutionHashes {
                notebook_hash: "nh".to_string(),
                parameters_hash: "ph".to_string(),
                execution_hash: execution_hash.to_string(),
            },
            callback_token: "a".repeat(32),
            owner,
        }
    }
}
