//! Cluster-scheduled notebook workloads.
//!
//! The [`JobOrchestrator`] translates an execution into a configuration
//! bundle, a secrets bundle and a batch workload, and manages that workload
//! through a narrow [`ClusterScheduler`] capability. [`KubeScheduler`] talks
//! to Kubernetes; [`MemoryScheduler`] is an in-process fake.

mod kubernetes;
mod memory;
mod orchestrator;

pub use kubernetes::KubeScheduler;
pub use memory::MemoryScheduler;
pub use orchestrator::{
    config_bundle_name, secret_bundle_name, workload_name, CancelOutcome, JobOrchestrator,
    OrchestratorSettings, WorkloadStatus, WorkloadSummary,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::AppError;
use crate::execution::ExecutionStatus;

pub type Labels = BTreeMap<String, String>;

/// Named key/value bundle (non-secret configuration or secrets).
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub name: String,
    pub labels: Labels,
    pub data: BTreeMap<String, String>,
}

/// Batch workload descriptor for one notebook run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub labels: Labels,
    pub image: String,
    pub image_pull_policy: String,
    /// CPU quantity, e.g. `1000m`.
    pub cpu: String,
    /// Memory quantity, e.g. `2048Mi`; used as both request and limit.
    pub memory: String,
    /// Bundles whose entries become the container environment.
    pub config_bundle: String,
    pub secret_bundle: String,
    pub ttl_seconds_after_finished: i32,
    pub backoff_limit: i32,
    pub run_as_user: i64,
}

/// Handle to a created workload, used for owner references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub name: String,
    pub uid: String,
}

/// Observed state of a workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadInfo {
    pub name: String,
    pub labels: Labels,
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

impl WorkloadInfo {
    /// Execution status implied by the workload's pod counters.
    pub fn execution_status(&self) -> ExecutionStatus {
        if self.active > 0 {
            ExecutionStatus::Running
        } else if self.succeeded > 0 {
            ExecutionStatus::Completed
        } else if self.failed > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Pending
        }
    }

    pub fn is_finished(&self) -> bool {
        self.active == 0 && (self.succeeded > 0 || self.failed > 0)
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("scheduler error: {0}")]
    Api(String),

    #[error("scheduler call {0}")]
    Timeout(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            SchedulerError::Api(msg) | SchedulerError::Timeout(msg) => AppError::Infrastructure(msg),
        }
    }
}

/// Operations the orchestrator needs from a cluster.
#[async_trait]
pub trait ClusterScheduler: Send + Sync {
    async fn create_config_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError>;

    async fn create_secret_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError>;

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadRef, SchedulerError>;

    /// Make `owner` the owner of a config bundle so it is collected with it.
    async fn set_config_bundle_owner(
        &self,
        bundle: &str,
        owner: &WorkloadRef,
    ) -> Result<(), SchedulerError>;

    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, SchedulerError>;

    /// Workloads carrying every label in `selector`.
    async fn list_workloads(&self, selector: &Labels) -> Result<Vec<WorkloadInfo>, SchedulerError>;

    /// Delete a workload and its pods (foreground propagation).
    async fn delete_workload(&self, name: &str) -> Result<(), SchedulerError>;

    async fn delete_config_bundle(&self, name: &str) -> Result<(), SchedulerError>;

    async fn delete_secret_bundle(&self, name: &str) -> Result<(), SchedulerError>;
}
