//! HTTP handlers for the NBForge Control Plane API.
//!
//! This module contains all route handlers organized by domain, and the
//! router that wires them together.

pub mod callbacks;
pub mod executions;
pub mod health;
pub mod principal;
pub mod workloads;

pub use health::{api_health, health_check};
pub use principal::Caller;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admission::{admission_middleware, AdmissionController};
use crate::services::{CallbackGateway, ExecutionService};
use crate::state::AppState;

/// Build the application router with all routes.
pub fn router(
    state: AppState,
    executions: ExecutionService,
    callbacks: CallbackGateway,
    admission: Arc<AdmissionController>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Health check routes (no auth, no admission control)
    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health))
        .with_state(state);

    let execution_routes = Router::new()
        .route(
            "/api/v1/executions",
            post(executions::create).get(executions::list),
        )
        .route(
            "/api/v1/executions/check-duplicate",
            post(executions::check_duplicate),
        )
        .route("/api/v1/executions/{id}", get(executions::get))
        .route("/api/v1/executions/{id}/cancel", post(executions::cancel))
        .route("/api/v1/executions/{id}/workload", get(executions::workload))
        .route("/api/v1/workloads", get(workloads::list))
        .with_state(executions);

    // Runner reports are token-authenticated and must not be dropped, so
    // they bypass admission control like the health probes.
    let callback_routes = Router::new()
        .route(
            "/api/v1/executions/{id}/status",
            post(callbacks::update_status),
        )
        .with_state(callbacks);

    let api_routes = execution_routes
        .layer(middleware::from_fn_with_state(admission, admission_middleware));

    Router::new()
        .merge(health_routes)
        .merge(callback_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
