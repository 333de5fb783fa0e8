//! Runner status callback handler.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::callback::{CallbackAck, CallbackGateway, StatusCallback};

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Apply a status report from the runner of an execution.
///
/// POST /api/v1/executions/{id}/status
pub async fn update_status(
    State(gateway): State<CallbackGateway>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(update): Json<StatusCallback>,
) -> Result<Json<CallbackAck>, AppError> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing X-Callback-Token header".to_string()))?;

    Ok(Json(gateway.apply_update(id, token, update).await?))
}
