//! Cluster workload listing.

use axum::{extract::State, Json};

use super::principal::Caller;
use crate::cluster::WorkloadSummary;
use crate::error::AppError;
use crate::services::ExecutionService;

/// List notebook runner workloads known to the scheduler.
///
/// GET /api/v1/workloads
pub async fn list(
    State(service): State<ExecutionService>,
    Caller(_): Caller,
) -> Result<Json<Vec<WorkloadSummary>>, AppError> {
    Ok(Json(service.list_workloads().await?))
}
