//! Execution to workload translation and workload lifecycle.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Bundle, ClusterScheduler, Labels, SchedulerError, WorkloadInfo, WorkloadSpec};
use crate::config::{ClusterConfig, StorageConfig};
use crate::execution::{Execution, ExecutionStatus};
use crate::result_ext::ResultExt;

const APP_LABEL: &str = "nbforge";
const COMPONENT_LABEL: &str = "notebook-runner";
const EXECUTION_ID_LABEL: &str = "execution-id";
const WORKLOAD_PREFIX: &str = "notebook-execution-";
const RUNNER_UID: i64 = 1000;
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub fn workload_name(execution_id: &Uuid) -> String {
    format!("{}{}", WORKLOAD_PREFIX, execution_id)
}

pub fn config_bundle_name(execution_id: &Uuid) -> String {
    format!("nbforge-job-{}-config", execution_id)
}

pub fn secret_bundle_name(execution_id: &Uuid) -> String {
    format!("nbforge-job-{}-secret", execution_id)
}

/// Static inputs for every workload the orchestrator builds.
#[derive(Clone)]
pub struct OrchestratorSettings {
    pub runner_image: String,
    pub image_pull_policy: String,
    /// Callback base URL handed to the runner.
    pub api_url: String,
    pub bucket: String,
    pub storage_endpoint: Option<String>,
    pub storage_access_key_id: String,
    pub storage_secret_access_key: String,
    pub ttl_seconds_after_finished: i32,
}

impl OrchestratorSettings {
    pub fn from_config(cluster: &ClusterConfig, storage: &StorageConfig, api_url: &str) -> Self {
        Self {
            runner_image: cluster.runner_image.clone(),
            image_pull_policy: cluster.image_pull_policy.clone(),
            api_url: api_url.to_string(),
            bucket: storage.bucket.clone(),
            storage_endpoint: storage.endpoint_url.clone().filter(|e| !e.is_empty()),
            storage_access_key_id: storage.access_key_id.clone(),
            storage_secret_access_key: storage.secret_access_key.clone(),
            ttl_seconds_after_finished: cluster.job_ttl_seconds,
        }
    }
}

/// Scheduler-side view of one execution's workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadStatus {
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// Entry of [`JobOrchestrator::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadSummary {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// Result of a cancel request that reached the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The workload was deleted.
    Cancelled,
    /// The workload had already succeeded or failed.
    AlreadyFinished(ExecutionStatus),
    /// No such workload exists.
    NotFound,
}

/// Builds, submits and manages notebook runner workloads.
///
/// Every scheduler call is bounded by its own timeout, so a stalled step
/// fails inside `submit` or `cancel` and their cleanup still runs.
#[derive(Clone)]
pub struct JobOrchestrator {
    scheduler: Arc<dyn ClusterScheduler>,
    settings: OrchestratorSettings,
    call_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(scheduler: Arc<dyn ClusterScheduler>, settings: OrchestratorSettings) -> Self {
        Self {
            scheduler,
            settings,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, SchedulerError>
    where
        F: Future<Output = Result<T, SchedulerError>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(SchedulerError::Timeout(format!(
                    "{} timed out after {}s",
                    operation,
                    self.call_timeout.as_secs()
                )))
            })
    }

    fn selector() -> Labels {
        let mut labels = Labels::new();
        labels.insert("app".to_string(), APP_LABEL.to_string());
        labels.insert("component".to_string(), COMPONENT_LABEL.to_string());
        labels
    }

    fn labels(execution_id: &Uuid) -> Labels {
        let mut labels = Self::selector();
        labels.insert(EXECUTION_ID_LABEL.to_string(), execution_id.to_string());
        labels
    }

    /// Non-secret runner configuration.
    pub fn config_bundle(&self, execution: &Execution) -> Bundle {
        let id = execution.id.to_string();
        let mut data = BTreeMap::new();
        data.insert("NOTEBOOK_PATH".to_string(), execution.notebook_path.clone());
        data.insert(
            "PARAMETERS".to_string(),
            Value::Object(execution.parameters.clone()).to_string(),
        );
        data.insert(
            "REQUIREMENTS".to_string(),
            Value::from(execution.resources.requirements.clone()).to_string(),
        );
        data.insert("JOB_ID".to_string(), id.clone());
        data.insert("S3_BUCKET".to_string(), self.settings.bucket.clone());
        data.insert("API_URL".to_string(), self.settings.api_url.clone());
        data.insert(
            "PYTHON_VERSION".to_string(),
            execution.resources.python_version.clone(),
        );
        data.insert("OUTPUT_PATH".to_string(), format!("outputs/{}", id));
        data.insert("EXTRACT_JSON_OUTPUTS".to_string(), "true".to_string());
        if let Some(endpoint) = &self.settings.storage_endpoint {
            data.insert("S3_ENDPOINT_URL".to_string(), endpoint.clone());
        }
        Bundle {
            name: config_bundle_name(&execution.id),
            labels: Self::labels(&execution.id),
            data,
        }
    }

    /// Storage credentials and the callback token.
    pub fn secret_bundle(&self, execution: &Execution) -> Bundle {
        let mut data = BTreeMap::new();
        data.insert(
            "AWS_ACCESS_KEY_ID".to_string(),
            self.settings.storage_access_key_id.clone(),
        );
        data.insert(
            "AWS_SECRET_ACCESS_KEY".to_string(),
            self.settings.storage_secret_access_key.clone(),
        );
        data.insert("CALLBACK_TOKEN".to_string(), execution.callback_token.clone());
        Bundle {
            name: secret_bundle_name(&execution.id),
            labels: Self::labels(&execution.id),
            data,
        }
    }

    pub fn workload_spec(&self, execution: &Execution) -> WorkloadSpec {
        let memory = format!("{}Mi", execution.resources.memory_mib);
        WorkloadSpec {
            name: workload_name(&execution.id),
            labels: Self::labels(&execution.id),
            image: self.settings.runner_image.clone(),
            image_pull_policy: self.settings.image_pull_policy.clone(),
            cpu: format!("{}m", execution.resources.cpu_milli),
            memory,
            config_bundle: config_bundle_name(&execution.id),
            secret_bundle: secret_bundle_name(&execution.id),
            ttl_seconds_after_finished: self.settings.ttl_seconds_after_finished,
            backoff_limit: 0,
            run_as_user: RUNNER_UID,
        }
    }

    /// Create bundles and workload for `execution`; returns the workload name.
    ///
    /// On failure the workload (which may exist if only its response was
    /// lost) and every bundle are removed before the error is returned.
    pub async fn submit(&self, execution: &Execution) -> Result<String, SchedulerError> {
        let config = self.config_bundle(execution);
        let secret = self.secret_bundle(execution);
        let spec = self.workload_spec(execution);

        if let Err(e) = self
            .call("create config bundle", self.scheduler.create_config_bundle(&config))
            .await
        {
            self.cleanup_bundles(&execution.id).await;
            return Err(e);
        }
        if let Err(e) = self
            .call("create secret bundle", self.scheduler.create_secret_bundle(&secret))
            .await
        {
            self.cleanup_bundles(&execution.id).await;
            return Err(e);
        }

        let workload = match self
            .call("create workload", self.scheduler.create_workload(&spec))
            .await
        {
            Ok(workload) => workload,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "Workload creation failed");
                self.discard(&execution.id).await;
                return Err(e);
            }
        };

        // Owner reference only drives garbage collection; the run proceeds without it.
        self.call(
            "set config bundle owner",
            self.scheduler.set_config_bundle_owner(&config.name, &workload),
        )
        .await
        .best_effort("setting workload as config bundle owner");

        info!(
            execution_id = %execution.id,
            workload = %workload.name,
            cpu = %spec.cpu,
            memory = %spec.memory,
            "Submitted notebook workload"
        );
        Ok(workload.name)
    }

    /// Remove whatever a failed submission left behind.
    async fn discard(&self, execution_id: &Uuid) {
        let name = workload_name(execution_id);
        match self
            .call("delete workload", self.scheduler.delete_workload(&name))
            .await
        {
            Ok(()) => info!(workload = %name, "Deleted workload of failed submission"),
            Err(SchedulerError::NotFound(_)) => {}
            Err(e) => {
                warn!(workload = %name, error = %e, "Workload cleanup after failed submission failed")
            }
        }
        self.cleanup_bundles(execution_id).await;
    }

    pub async fn get_status(&self, execution_id: &Uuid) -> Result<WorkloadStatus, SchedulerError> {
        let name = workload_name(execution_id);
        let info = self
            .call("get workload", self.scheduler.get_workload(&name))
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("Workload {}", name)))?;
        Ok(WorkloadStatus {
            status: info.execution_status(),
            start_time: info.start_time,
            completion_time: info.completion_time,
        })
    }

    /// Stop the workload of `execution_id`. Safe to repeat.
    ///
    /// Returns `Cancelled` only when the workload delete call succeeded; an
    /// error means the workload may still be running.
    pub async fn cancel(&self, execution_id: &Uuid) -> Result<CancelOutcome, SchedulerError> {
        let name = workload_name(execution_id);
        let info = match self
            .call("get workload", self.scheduler.get_workload(&name))
            .await
        {
            Ok(Some(info)) => info,
            Ok(None) | Err(SchedulerError::NotFound(_)) => {
                debug!(workload = %name, "Workload not found for cancellation");
                return Ok(CancelOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        if info.is_finished() {
            self.cleanup_bundles(execution_id).await;
            return Ok(CancelOutcome::AlreadyFinished(info.execution_status()));
        }

        match self
            .call("delete workload", self.scheduler.delete_workload(&name))
            .await
        {
            Ok(()) => {}
            Err(SchedulerError::NotFound(_)) => return Ok(CancelOutcome::NotFound),
            Err(e) => return Err(e),
        }
        self.cleanup_bundles(execution_id).await;
        info!(workload = %name, "Cancelled notebook workload");
        Ok(CancelOutcome::Cancelled)
    }

    pub async fn list(&self) -> Result<Vec<WorkloadSummary>, SchedulerError> {
        let selector = Self::selector();
        let workloads = self
            .call("list workloads", self.scheduler.list_workloads(&selector))
            .await?;
        Ok(workloads.into_iter().map(summarize).collect())
    }

    async fn cleanup_bundles(&self, execution_id: &Uuid) {
        let config = config_bundle_name(execution_id);
        let secret = secret_bundle_name(execution_id);
        for (kind, result) in [
            (
                "config",
                self.call("delete config bundle", self.scheduler.delete_config_bundle(&config))
                    .await,
            ),
            (
                "secret",
                self.call("delete secret bundle", self.scheduler.delete_secret_bundle(&secret))
                    .await,
            ),
        ] {
            match result {
                Ok(()) | Err(SchedulerError::NotFound(_)) => {}
                Err(e) => {
                    warn!(execution_id = %execution_id, bundle = kind, error = %e, "Bundle cleanup failed")
                }
            }
        }
    }
}

fn summarize(info: WorkloadInfo) -> WorkloadSummary {
    let execution_id = info
        .labels
        .get(EXECUTION_ID_LABEL)
        .cloned()
        .unwrap_or_else(|| {
            info.name
                .strip_prefix(WORKLOAD_PREFIX)
                .unwrap_or(&info.name)
                .to_string()
        });
    WorkloadSummary {
        execution_id,
        status: info.execution_status(),
        start_time: info.start_time,
        completion_time: info.completion_time,
    }
}
