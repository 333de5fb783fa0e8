//! Execution API handlers.
//!
//! Handles creation, duplicate checks, listing, inspection and cancellation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::principal::Caller;
use crate::cluster::WorkloadStatus;
use crate::error::AppError;
use crate::execution::Execution;
use crate::services::execution::{
    CancelResponse, CancelResult, CreateExecutionRequest, CreateExecutionResponse,
    DuplicateCheckRequest, DuplicateCheckResponse, ExecutionService,
};
use crate::store::ExecutionFilter;

/// Query parameters for execution creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuery {
    #[serde(default = "default_check_duplicate")]
    pub check_duplicate: bool,
}

fn default_check_duplicate() -> bool {
    true
}

/// Create an execution.
///
/// POST /api/v1/executions?check_duplicate=bool
pub async fn create(
    State(service): State<ExecutionService>,
    Caller(owner): Caller,
    Query(query): Query<CreateQuery>,
    Json(request): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<CreateExecutionResponse>), AppError> {
    let response = service.create(request, owner, query.check_duplicate).await?;
    let status = if response.is_duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// Check for a completed run with identical notebook and parameters.
///
/// POST /api/v1/executions/check-duplicate
pub async fn check_duplicate(
    State(service): State<ExecutionService>,
    Caller(owner): Caller,
    Json(request): Json<DuplicateCheckRequest>,
) -> Result<Json<DuplicateCheckResponse>, AppError> {
    Ok(Json(service.check_duplicate(request, &owner).await?))
}

/// List executions, newest first.
///
/// GET /api/v1/executions?notebook_path=&status=&limit=&offset=
pub async fn list(
    State(service): State<ExecutionService>,
    Caller(owner): Caller,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Json<Vec<Execution>>, AppError> {
    Ok(Json(service.list(filter, &owner).await?))
}

/// Get execution details.
///
/// GET /api/v1/executions/{id}
pub async fn get(
    State(service): State<ExecutionService>,
    Caller(_): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Execution>, AppError> {
    Ok(Json(service.get(id).await?))
}

/// Cancel an execution owned by the caller.
///
/// POST /api/v1/executions/{id}/cancel
pub async fn cancel(
    State(service): State<ExecutionService>,
    Caller(owner): Caller,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<CancelResponse>), AppError> {
    let response = service.cancel(id, &owner).await?;
    let status = match response.outcome {
        CancelResult::Cancelled => StatusCode::OK,
        CancelResult::AlreadyTerminal | CancelResult::TooLate => StatusCode::CONFLICT,
        CancelResult::WorkloadNotFound => StatusCode::NOT_FOUND,
        CancelResult::Failed => StatusCode::BAD_GATEWAY,
    };
    Ok((status, Json(response)))
}

/// Scheduler status of the workload backing an execution.
///
/// GET /api/v1/executions/{id}/workload
pub async fn workload(
    State(service): State<ExecutionService>,
    Caller(_): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkloadStatus>, AppError> {
    Ok(Json(service.workload_status(id).await?))
}
