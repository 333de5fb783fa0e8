//! Execution submission, inspection and cancellation.
//!
//! [`ExecutionService`] is the submit path: it reads the notebook through the
//! cached object storage, coerces parameters, decides whether an equivalent
//! run already succeeded, persists the record and hands it to the
//! [`JobOrchestrator`]. Cancellation reconciles the record with whatever the
//! scheduler reports.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cluster::{CancelOutcome, JobOrchestrator, WorkloadStatus, WorkloadSummary};
use crate::config::AppConfig;
use crate::crypto::generate_callback_token;
use crate::error::{AppError, AppResult};
use crate::execution::{
    Execution, ExecutionStatus, NewExecution, Owner, Parameters, ResourceRequest, StatusFields,
};
use crate::hashing::execution_hashes;
use crate::io_pool::IoPool;
use crate::notebook::{coerce_parameters, NotebookMetadata};
use crate::result_ext::ResultExt;
use crate::storage::{ObjectStorage, StorageError};
use crate::store::{ExecutionFilter, ExecutionRecords};

const WORKLOAD_MISSING_ERROR: &str =
    "Job not found in Kubernetes. It may have been terminated outside of the system.";

/// Resource values applied when neither the request nor the notebook sets them.
#[derive(Debug, Clone)]
pub struct ExecutionDefaults {
    pub python_version: String,
    pub cpu_milli: i32,
    pub memory_mib: i32,
}

impl ExecutionDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            python_version: config.default_python_version.clone(),
            cpu_milli: config.default_cpu_milli,
            memory_mib: config.default_memory_mib,
        }
    }
}

/// Body of `POST /executions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateExecutionRequest {
    pub notebook_path: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub cpu_milli: Option<i32>,
    #[serde(default)]
    pub memory_mib: Option<i32>,
    #[serde(default)]
    pub force_rerun: Option<bool>,
}

impl CreateExecutionRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_notebook_path(&self.notebook_path)?;
        for (field, value) in [("cpu_milli", self.cpu_milli), ("memory_mib", self.memory_mib)] {
            if matches!(value, Some(v) if v <= 0) {
                return Err(AppError::Validation(format!("{} must be positive", field)));
            }
        }
        if matches!(&self.python_version, Some(v) if v.trim().is_empty()) {
            return Err(AppError::Validation(
                "python_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_notebook_path(path: &str) -> AppResult<()> {
    if path.trim().is_empty() {
        return Err(AppError::Validation("notebook_path is required".to_string()));
    }
    if !path.ends_with(".ipynb") {
        return Err(AppError::Validation(format!(
            "notebook_path must point to an .ipynb file, got {}",
            path
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateExecutionResponse {
    pub execution: Execution,
    pub is_duplicate: bool,
}

/// Body of `POST /executions/check-duplicate`.
#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateCheckRequest {
    pub notebook_path: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheckResponse {
    pub is_duplicate: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_execution: Option<Execution>,
}

/// How a cancel request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResult {
    Cancelled,
    /// The record was already terminal before anything was attempted.
    AlreadyTerminal,
    /// The run reached a terminal state while the cancel was in flight.
    TooLate,
    /// The workload was gone; the record was reconciled to `failed`.
    WorkloadNotFound,
    /// The scheduler call failed; the workload may still be running.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub reason: String,
    pub current_status: ExecutionStatus,
    pub outcome: CancelResult,
}

/// Submit path and lifecycle operations for notebook executions.
#[derive(Clone)]
pub struct ExecutionService {
    records: ExecutionRecords,
    storage: Arc<dyn ObjectStorage>,
    orchestrator: Arc<JobOrchestrator>,
    io: IoPool,
    defaults: ExecutionDefaults,
}

impl ExecutionService {
    pub fn new(
        records: ExecutionRecords,
        storage: Arc<dyn ObjectStorage>,
        orchestrator: Arc<JobOrchestrator>,
        io: IoPool,
        defaults: ExecutionDefaults,
    ) -> Self {
        Self {
            records,
            storage,
            orchestrator,
            io,
            defaults,
        }
    }

    /// Create an execution, or return the latest equivalent successful run.
    ///
    /// Service principals rerun unless they explicitly pass
    /// `force_rerun: false`; `check_duplicate = false` always reruns.
    pub async fn create(
        &self,
        request: CreateExecutionRequest,
        owner: Owner,
        check_duplicate: bool,
    ) -> AppResult<CreateExecutionResponse> {
        request.validate()?;

        let content = self.read_notebook(&request.notebook_path).await?;
        let metadata = NotebookMetadata::parse(&content)?;
        let parameters = coerce_parameters(request.parameters, &metadata);
        let hashes = execution_hashes(&content, &parameters)?;

        let force_rerun = request.force_rerun.unwrap_or(!owner.is_user()) || !check_duplicate;
        if !force_rerun {
            if let Some(mut existing) = self
                .records
                .find_latest_completed(&hashes.execution_hash, None)
                .await?
            {
                info!(
                    execution_id = %existing.id,
                    notebook_path = %existing.notebook_path,
                    "Returning duplicate execution"
                );
                existing.notebook_name = display_name(&metadata);
                return Ok(CreateExecutionResponse {
                    execution: existing,
                    is_duplicate: true,
                });
            }
        }

        let resources = ResourceRequest {
            cpu_milli: request
                .cpu_milli
                .or(metadata.resources.cpu_milli)
                .unwrap_or(self.defaults.cpu_milli),
            memory_mib: request
                .memory_mib
                .or(metadata.resources.memory_mib)
                .unwrap_or(self.defaults.memory_mib),
            python_version: request
                .python_version
                .or_else(|| metadata.python_version.clone())
                .unwrap_or_else(|| self.defaults.python_version.clone()),
            requirements: metadata.requirements.clone(),
        };
        if resources.cpu_milli <= 0 || resources.memory_mib <= 0 {
            return Err(AppError::Validation(format!(
                "Notebook {} declares non-positive resources",
                request.notebook_path
            )));
        }

        let mut execution = Execution::pending(NewExecution {
            notebook_path: request.notebook_path,
            parameters,
            resources,
            hashes,
            callback_token: generate_callback_token(),
            owner,
        });
        self.records.create(&execution).await?;
        info!(
            execution_id = %execution.id,
            notebook_path = %execution.notebook_path,
            owner = %execution.owner,
            "Created execution"
        );

        let submitted = self
            .io
            .run_with_permit(self.orchestrator.submit(&execution))
            .await;
        execution = match submitted {
            Ok(_) => self.mark_submitted(execution.id).await?,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "Workload submission failed");
                self.records
                    .transition(
                        execution.id,
                        ExecutionStatus::Failed,
                        StatusFields::failure(e.to_string()),
                    )
                    .await
                    .best_effort("marking execution failed after submission error");
                return Err(e);
            }
        };

        execution.notebook_name = display_name(&metadata);
        Ok(CreateExecutionResponse {
            execution,
            is_duplicate: false,
        })
    }

    /// The runner may report before `submitted` is recorded; the later
    /// state then stands.
    async fn mark_submitted(&self, id: Uuid) -> AppResult<Execution> {
        match self
            .records
            .transition(id, ExecutionStatus::Submitted, StatusFields::default())
            .await
        {
            Ok(execution) => Ok(execution),
            Err(AppError::Conflict(_)) => self.records.get(id).await,
            Err(e) => Err(e),
        }
    }

    /// Look for a completed run of the same notebook content and parameters.
    ///
    /// Users only see their own runs; service principals search globally.
    pub async fn check_duplicate(
        &self,
        request: DuplicateCheckRequest,
        caller: &Owner,
    ) -> AppResult<DuplicateCheckResponse> {
        validate_notebook_path(&request.notebook_path)?;

        let content = self.read_notebook(&request.notebook_path).await?;
        let metadata = NotebookMetadata::parse(&content)?;
        let parameters = coerce_parameters(request.parameters, &metadata);
        let hashes = execution_hashes(&content, &parameters)?;

        let scope = caller.is_user().then_some(caller);
        let duplicate = self
            .records
            .find_latest_completed(&hashes.execution_hash, scope)
            .await?;

        Ok(match duplicate {
            Some(mut original) => {
                original.notebook_name = display_name(&metadata);
                DuplicateCheckResponse {
                    is_duplicate: true,
                    message: format!(
                        "Found a duplicate execution from {}",
                        original.created_at.to_rfc3339()
                    ),
                    original_execution: Some(original),
                }
            }
            None => DuplicateCheckResponse {
                is_duplicate: false,
                message: "No duplicate executions found".to_string(),
                original_execution: None,
            },
        })
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Execution> {
        let mut execution = self.records.get(id).await?;
        execution.notebook_name = self.notebook_name(&execution.notebook_path).await;
        Ok(execution)
    }

    /// Users list their own executions; service principals list all.
    pub async fn list(&self, filter: ExecutionFilter, caller: &Owner) -> AppResult<Vec<Execution>> {
        let mut filter = filter.normalized();
        filter.owner = caller.is_user().then(|| caller.clone());
        self.records.list(&filter).await
    }

    /// Cancel a non-terminal execution owned by `caller`.
    pub async fn cancel(&self, id: Uuid, caller: &Owner) -> AppResult<CancelResponse> {
        let execution = self.records.get(id).await?;
        if &execution.owner != caller {
            return Err(AppError::Forbidden(format!(
                "Execution {} belongs to another owner",
                id
            )));
        }

        if execution.status.is_terminal() {
            return Ok(CancelResponse {
                success: false,
                reason: format!(
                    "Cannot cancel execution {} as it is already in {} state",
                    id, execution.status
                ),
                current_status: execution.status,
                outcome: CancelResult::AlreadyTerminal,
            });
        }

        let outcome = self
            .io
            .run_with_permit(self.orchestrator.cancel(&id))
            .await;

        match outcome {
            Ok(CancelOutcome::Cancelled) => {
                match self
                    .records
                    .transition(id, ExecutionStatus::Cancelled, StatusFields::finished_now())
                    .await
                {
                    Ok(cancelled) => {
                        info!(execution_id = %id, "Cancelled execution");
                        Ok(CancelResponse {
                            success: true,
                            reason: "Execution successfully cancelled".to_string(),
                            current_status: cancelled.status,
                            outcome: CancelResult::Cancelled,
                        })
                    }
                    Err(AppError::Conflict(_)) => self.too_late(id).await,
                    Err(e) => Err(e),
                }
            }
            Ok(CancelOutcome::AlreadyFinished(workload_status)) => {
                let current = self.records.get(id).await?;
                if current.status.is_terminal() {
                    return self.too_late(id).await;
                }
                Ok(CancelResponse {
                    success: false,
                    reason: format!(
                        "Workload for execution {} already {}; awaiting the runner's final report",
                        id, workload_status
                    ),
                    current_status: current.status,
                    outcome: CancelResult::AlreadyTerminal,
                })
            }
            Ok(CancelOutcome::NotFound) => {
                match self
                    .records
                    .transition(
                        id,
                        ExecutionStatus::Failed,
                        StatusFields::failure(WORKLOAD_MISSING_ERROR),
                    )
                    .await
                {
                    Ok(failed) => {
                        warn!(execution_id = %id, "Workload missing on cancel; marked failed");
                        Ok(CancelResponse {
                            success: false,
                            reason: format!(
                                "Job for execution {} not found in Kubernetes. It may have already completed, failed, or been terminated.",
                                id
                            ),
                            current_status: failed.status,
                            outcome: CancelResult::WorkloadNotFound,
                        })
                    }
                    Err(AppError::Conflict(_)) => self.too_late(id).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Cancel request failed");
                let current = self.records.get(id).await?;
                Ok(CancelResponse {
                    success: false,
                    reason: format!(
                        "Error occurred while cancelling execution {}: {}",
                        id, e
                    ),
                    current_status: current.status,
                    outcome: CancelResult::Failed,
                })
            }
        }
    }

    async fn too_late(&self, id: Uuid) -> AppResult<CancelResponse> {
        let current = self.records.get(id).await?;
        Ok(CancelResponse {
            success: false,
            reason: format!("Cannot cancel execution that has already {}", current.status),
            current_status: current.status,
            outcome: CancelResult::TooLate,
        })
    }

    /// Scheduler view of the workload backing `id`.
    pub async fn workload_status(&self, id: Uuid) -> AppResult<WorkloadStatus> {
        self.records.get(id).await?;
        self.io
            .run("get workload status", self.orchestrator.get_status(&id))
            .await
    }

    pub async fn list_workloads(&self) -> AppResult<Vec<WorkloadSummary>> {
        self.io.run("list workloads", self.orchestrator.list()).await
    }

    async fn read_notebook(&self, path: &str) -> AppResult<Bytes> {
        let object = self
            .io
            .run("read notebook", async {
                self.storage.read(path).await.map_err(|e| match e {
                    StorageError::NotFound(_) => {
                        AppError::NotFound(format!("Notebook {} not found", path))
                    }
                    other => other.into(),
                })
            })
            .await?;
        Ok(object.bytes)
    }

    async fn notebook_name(&self, path: &str) -> Option<String> {
        let content = self
            .read_notebook(path)
            .await
            .best_effort("reading notebook for display name")?;
        let metadata = NotebookMetadata::parse(&content)
            .best_effort("parsing notebook metadata")?;
        display_name(&metadata)
    }
}

fn display_name(metadata: &NotebookMetadata) -> Option<String> {
    (!metadata.name.is_empty()).then(|| metadata.name.clone())
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::testing::*;
    use super::*;
    use crate::cluster::{
        config_bundle_name, secret_bundle_name, workload_name, Bundle, ClusterScheduler, Labels,
        MemoryScheduler, SchedulerError, WorkloadInfo, WorkloadRef, WorkloadSpec,
    };
    use crate::execution::fixtures;

    fn alice() -> Owner {
        Owner::user("alice").unwrap()
    }

    /// Memory scheduler with scripted stalls and runner reports.
    #[derive(Clone)]
    struct ScriptedScheduler {
        inner: Arc<MemoryScheduler>,
        records: ExecutionRecords,
        stall_after_create: bool,
        stall_owner_patch: bool,
        /// Runner report that lands while the workload delete is in flight.
        report_during_delete: Option<ExecutionStatus>,
        vanish_during_delete: bool,
    }

    impl ScriptedScheduler {
        fn new(inner: Arc<MemoryScheduler>, records: ExecutionRecords) -> Self {
            Self {
                inner,
                records,
                stall_after_create: false,
                stall_owner_patch: false,
                report_during_delete: None,
                vanish_during_delete: false,
            }
        }
    }

    #[async_trait]
    impl ClusterScheduler for ScriptedScheduler {
        async fn create_config_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
            self.inner.create_config_bundle(bundle).await
        }

        async fn create_secret_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
            self.inner.create_secret_bundle(bundle).await
        }

        async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadRef, SchedulerError> {
            let created = self.inner.create_workload(spec).await?;
            if self.stall_after_create {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(created)
        }

        async fn set_config_bundle_owner(
            &self,
            bundle: &str,
            owner: &WorkloadRef,
        ) -> Result<(), SchedulerError> {
            if self.stall_owner_patch {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.set_config_bundle_owner(bundle, owner).await
        }

        async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, SchedulerError> {
            self.inner.get_workload(name).await
        }

        async fn list_workloads(&self, selector: &Labels) -> Result<Vec<WorkloadInfo>, SchedulerError> {
            self.inner.list_workloads(selector).await
        }

        async fn delete_workload(&self, name: &str) -> Result<(), SchedulerError> {
            if let Some(status) = self.report_during_delete {
                let id: Uuid = name
                    .strip_prefix("notebook-execution-")
                    .and_then(|id| id.parse().ok())
                    .unwrap();
                self.records
                    .transition(id, status, StatusFields::finished_now())
                    .await
                    .unwrap();
                if self.vanish_during_delete {
                    self.inner.remove_workload(name);
                    return Err(SchedulerError::NotFound(format!("Job {}", name)));
                }
            }
            self.inner.delete_workload(name).await
        }

        async fn delete_config_bundle(&self, name: &str) -> Result<(), SchedulerError> {
            self.inner.delete_config_bundle(name).await
        }

        async fn delete_secret_bundle(&self, name: &str) -> Result<(), SchedulerError> {
            self.inner.delete_secret_bundle(name).await
        }
    }

    async fn complete(records: &ExecutionRecords, id: Uuid) {
        records
            .transition(id, ExecutionStatus::Completed, StatusFields::finished_now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_submits_workload() {
        let h = harness().await;
        let created = h
            .service
            .create(create_request(json!({"weeks": "6"})), alice(), true)
            .await
            .unwrap();

        assert!(!created.is_duplicate);
        let execution = created.execution;
        assert_eq!(execution.status, ExecutionStatus::Submitted);
        assert_eq!(execution.notebook_name.as_deref(), Some("Weekly report"));
        assert_eq!(execution.parameters["weeks"], json!(6));
        assert_eq!(execution.resources.cpu_milli, 500);
        assert_eq!(execution.resources.python_version, "3.11");
        assert_eq!(execution.resources.requirements, vec!["pandas==2.2.0"]);
        assert!(h.scheduler.workload_spec(&workload_name(&execution.id)).is_some());
    }

    #[tokio::test]
    async fn test_request_resources_override_notebook_hints() {
        let h = harness().await;
        let mut request = create_request(json!({}));
        request.cpu_milli = Some(2000);
        request.python_version = Some("3.12".into());
        let execution = h.service.create(request, alice(), true).await.unwrap().execution;
        assert_eq!(execution.resources.cpu_milli, 2000);
        assert_eq!(execution.resources.memory_mib, 1024);
        assert_eq!(execution.resources.python_version, "3.12");
    }

    #[tokio::test]
    async fn test_duplicate_returns_existing_completed_run() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({"weeks": 4, "region": "emea"})), alice(), true)
            .await
            .unwrap()
            .execution;
        complete(&h.records, first.id).await;

        let again = h
            .service
            .create(create_request(json!({"region": "emea", "weeks": "4"})), alice(), true)
            .await
            .unwrap();
        assert!(again.is_duplicate);
        assert_eq!(again.execution.id, first.id);
        assert_eq!(h.scheduler.workload_count(), 1);
    }

    #[tokio::test]
    async fn test_unfinished_runs_are_not_duplicates() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({"weeks": 3})), alice(), true)
            .await
            .unwrap()
            .execution;
        assert_eq!(first.status, ExecutionStatus::Submitted);

        let while_submitted = h
            .service
            .create(create_request(json!({"weeks": 3})), alice(), true)
            .await
            .unwrap();
        assert!(!while_submitted.is_duplicate);
        assert_ne!(while_submitted.execution.id, first.id);

        h.records
            .transition(
                first.id,
                ExecutionStatus::Running,
                StatusFields {
                    started_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let while_running = h
            .service
            .create(create_request(json!({"weeks": 3})), alice(), true)
            .await
            .unwrap();
        assert!(!while_running.is_duplicate);

        complete(&h.records, first.id).await;
        let after_completion = h
            .service
            .create(create_request(json!({"weeks": 3})), alice(), true)
            .await
            .unwrap();
        assert!(after_completion.is_duplicate);
        assert_eq!(after_completion.execution.id, first.id);
        assert_eq!(h.scheduler.workload_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_runs_are_never_duplicates() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.records
            .transition(first.id, ExecutionStatus::Failed, StatusFields::failure("boom"))
            .await
            .unwrap();

        let again = h.service.create(create_request(json!({})), alice(), true).await.unwrap();
        assert!(!again.is_duplicate);
        assert_ne!(again.execution.id, first.id);
    }

    #[tokio::test]
    async fn test_rerun_flags_skip_duplicate_check() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        complete(&h.records, first.id).await;

        let mut forced = create_request(json!({}));
        forced.force_rerun = Some(true);
        assert!(!h.service.create(forced, alice(), true).await.unwrap().is_duplicate);

        assert!(!h
            .service
            .create(create_request(json!({})), alice(), false)
            .await
            .unwrap()
            .is_duplicate);

        let principal = Owner::service_principal("nightly-etl").unwrap();
        assert!(!h
            .service
            .create(create_request(json!({})), principal.clone(), true)
            .await
            .unwrap()
            .is_duplicate);

        let mut opt_in = create_request(json!({}));
        opt_in.force_rerun = Some(false);
        assert!(h.service.create(opt_in, principal, true).await.unwrap().is_duplicate);
    }

    #[tokio::test]
    async fn test_submission_failure_marks_execution_failed() {
        let h = harness().await;
        h.scheduler.fail_workload_creation(true);

        let err = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Infrastructure(_)));

        let stored = h.records.list(&ExecutionFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ExecutionStatus::Failed);
        assert!(stored[0].error.is_some());
        assert!(h.scheduler.config_bundle(&config_bundle_name(&stored[0].id)).is_none());
        assert!(h.scheduler.secret_bundle(&secret_bundle_name(&stored[0].id)).is_none());
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let h = harness().await;
        let mut request = create_request(json!({}));
        request.notebook_path = "notebooks/report.py".into();
        assert!(matches!(
            h.service.create(request, alice(), true).await,
            Err(AppError::Validation(_))
        ));

        let mut request = create_request(json!({}));
        request.memory_mib = Some(0);
        assert!(matches!(
            h.service.create(request, alice(), true).await,
            Err(AppError::Validation(_))
        ));

        let mut request = create_request(json!({}));
        request.notebook_path = "notebooks/missing.ipynb".into();
        assert!(matches!(
            h.service.create(request, alice(), true).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_check_duplicate_is_scoped_to_user() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({"weeks": 2})), alice(), true)
            .await
            .unwrap()
            .execution;
        complete(&h.records, first.id).await;

        let request = DuplicateCheckRequest {
            notebook_path: NOTEBOOK_PATH.into(),
            parameters: json!({"weeks": "2"}).as_object().cloned().unwrap(),
        };
        let mine = h.service.check_duplicate(request.clone(), &alice()).await.unwrap();
        assert!(mine.is_duplicate);
        assert!(mine.message.starts_with("Found a duplicate execution from "));
        assert_eq!(mine.original_execution.unwrap().id, first.id);

        let bob = Owner::user("bob").unwrap();
        let theirs = h.service.check_duplicate(request.clone(), &bob).await.unwrap();
        assert!(!theirs.is_duplicate);
        assert_eq!(theirs.message, "No duplicate executions found");

        let principal = Owner::service_principal("etl").unwrap();
        assert!(h.service.check_duplicate(request, &principal).await.unwrap().is_duplicate);
    }

    #[tokio::test]
    async fn test_changed_notebook_is_not_a_duplicate() {
        let h = harness().await;
        let first = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        complete(&h.records, first.id).await;

        let mut changed: serde_json::Value = serde_json::from_slice(&notebook()).unwrap();
        changed["cells"][0]["source"] = json!("region: str = \"apac\"\n");
        h.storage
            .write(NOTEBOOK_PATH, Bytes::from(changed.to_string()))
            .await
            .unwrap();

        let again = h.service.create(create_request(json!({})), alice(), true).await.unwrap();
        assert!(!again.is_duplicate);
    }

    #[tokio::test]
    async fn test_list_is_scoped_for_users() {
        let h = harness().await;
        h.service.create(create_request(json!({})), alice(), false).await.unwrap();
        let bob = Owner::user("bob").unwrap();
        h.service.create(create_request(json!({})), bob.clone(), false).await.unwrap();

        assert_eq!(h.service.list(ExecutionFilter::default(), &bob).await.unwrap().len(), 1);
        let principal = Owner::service_principal("etl").unwrap();
        assert_eq!(
            h.service.list(ExecutionFilter::default(), &principal).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 1, 0, 0);

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.outcome, CancelResult::Cancelled);
        assert_eq!(response.current_status, ExecutionStatus::Cancelled);
        assert_eq!(h.scheduler.workload_count(), 0);

        let again = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(!again.success);
        assert_eq!(again.outcome, CancelResult::AlreadyTerminal);
        assert_eq!(
            again.reason,
            format!("Cannot cancel execution {} as it is already in cancelled state", execution.id)
        );
    }

    #[tokio::test]
    async fn test_cancel_requires_owner() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        let bob = Owner::user("bob").unwrap();
        assert!(matches!(
            h.service.cancel(execution.id, &bob).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_missing_workload_reconciles_to_failed() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.remove_workload(&workload_name(&execution.id));

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.outcome, CancelResult::WorkloadNotFound);
        let stored = h.records.get(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(WORKLOAD_MISSING_ERROR));
    }

    #[tokio::test]
    async fn test_cancel_delete_failure_keeps_record() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 1, 0, 0);
        h.scheduler.fail_workload_deletion(true);

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.outcome, CancelResult::Failed);
        assert_eq!(response.current_status, ExecutionStatus::Submitted);
    }

    #[tokio::test]
    async fn test_cancel_loses_race_with_completion_report() {
        let h = harness_with(|inner, records| {
            let mut scheduler = ScriptedScheduler::new(inner, records);
            scheduler.report_during_delete = Some(ExecutionStatus::Completed);
            Arc::new(scheduler) as Arc<dyn ClusterScheduler>
        })
        .await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 1, 0, 0);

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.outcome, CancelResult::TooLate);
        assert_eq!(response.current_status, ExecutionStatus::Completed);
        assert_eq!(
            response.reason,
            "Cannot cancel execution that has already completed"
        );
        assert_eq!(
            h.records.get(execution.id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_cancel_of_vanished_workload_keeps_runner_report() {
        let h = harness_with(|inner, records| {
            let mut scheduler = ScriptedScheduler::new(inner, records);
            scheduler.report_during_delete = Some(ExecutionStatus::Failed);
            scheduler.vanish_during_delete = true;
            Arc::new(scheduler) as Arc<dyn ClusterScheduler>
        })
        .await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 1, 0, 0);

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert_eq!(response.outcome, CancelResult::TooLate);
        assert_eq!(response.current_status, ExecutionStatus::Failed);
        let stored = h.records.get(execution.id).await.unwrap();
        assert_ne!(stored.error.as_deref(), Some(WORKLOAD_MISSING_ERROR));
    }

    #[tokio::test]
    async fn test_cancel_pending_execution_without_workload() {
        let h = harness().await;
        let pending = Execution::pending(fixtures::new_execution(alice(), "never-submitted"));
        h.records.create(&pending).await.unwrap();

        let response = h.service.cancel(pending.id, &alice()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.outcome, CancelResult::WorkloadNotFound);
        assert_eq!(response.current_status, ExecutionStatus::Failed);
        let stored = h.records.get(pending.id).await.unwrap();
        assert_eq!(stored.error.as_deref(), Some(WORKLOAD_MISSING_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_submission_leaves_nothing_allocated() {
        let h = harness_with(|inner, records| {
            let mut scheduler = ScriptedScheduler::new(inner, records);
            scheduler.stall_after_create = true;
            Arc::new(scheduler) as Arc<dyn ClusterScheduler>
        })
        .await;

        let err = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Infrastructure(ref msg) if msg.contains("timed out")));

        let stored = h.records.list(&ExecutionFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ExecutionStatus::Failed);
        assert_eq!(h.scheduler.workload_count(), 0);
        assert!(h.scheduler.config_bundle(&config_bundle_name(&stored[0].id)).is_none());
        assert!(h.scheduler.secret_bundle(&secret_bundle_name(&stored[0].id)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_owner_patch_does_not_fail_submission() {
        let h = harness_with(|inner, records| {
            let mut scheduler = ScriptedScheduler::new(inner, records);
            scheduler.stall_owner_patch = true;
            Arc::new(scheduler) as Arc<dyn ClusterScheduler>
        })
        .await;

        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        assert_eq!(execution.status, ExecutionStatus::Submitted);
        assert_eq!(h.scheduler.workload_count(), 1);
        assert!(h
            .scheduler
            .secret_bundle(&secret_bundle_name(&execution.id))
            .is_some());
    }

    #[tokio::test]
    async fn test_cancel_with_finished_workload_awaits_report() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 0, 1, 0);

        let response = h.service.cancel(execution.id, &alice()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.outcome, CancelResult::AlreadyTerminal);
        assert_eq!(response.current_status, ExecutionStatus::Submitted);
    }

    #[tokio::test]
    async fn test_completion_notifies_owner() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        complete(&h.records, execution.id).await;
        let sent = h.notifier.sent_after_yield().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice");
    }

    #[tokio::test]
    async fn test_workload_status_and_listing() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        h.scheduler.set_workload_counts(&workload_name(&execution.id), 1, 0, 0);

        let status = h.service.workload_status(execution.id).await.unwrap();
        assert_eq!(status.status, ExecutionStatus::Running);

        let workloads = h.service.list_workloads().await.unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].execution_id, execution.id.to_string());

        assert!(matches!(
            h.service.workload_status(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_fills_notebook_name() {
        let h = harness().await;
        let execution = h
            .service
            .create(create_request(json!({})), alice(), true)
            .await
            .unwrap()
            .execution;
        let fetched = h.service.get(execution.id).await.unwrap();
        assert_eq!(fetched.notebook_name.as_deref(), Some("Weekly report"));
    }
}
