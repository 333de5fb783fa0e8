//! NBForge Control Plane Library
//!
//! This crate provides the control plane server for NBForge, handling:
//!
//! - **Duplicate Detection**: Content hashes of notebooks and parameters
//! - **Execution Records**: A forward-only lifecycle persisted in PostgreSQL
//! - **Job Orchestration**: One Kubernetes Job per notebook run
//! - **Runner Callbacks**: Token-authenticated status reports
//! - **Admission Control**: Sliding-window rate limits per client and route
//!
//! ## Architecture
//!
//! A request passes admission control, is checked against completed runs with
//! the same execution hash, is recorded as `pending` and submitted to the
//! cluster. The runner reports `running`, `completed` or `failed` back through
//! the callback endpoint; users may cancel before a terminal state.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`store`]: Execution record persistence and the state machine
//! - [`cluster`]: Workload orchestration behind a scheduler trait
//! - [`storage`]: Object storage with a validating result cache
//! - [`services`]: Submit path, cancellation and the callback gateway
//! - [`handlers`]: HTTP route handlers and router
//! - [`error`]: Custom error types with Axum integration
//!
//! ## Example
//!
//! ```ignore
//! use nbforge_control_plane::{
//!     config::{AppConfig, DatabaseConfig},
//!     db::create_pool,
//!     store::PgExecutionStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app_config = AppConfig::from_env()?;
//!     let db_config = DatabaseConfig::from_env()?;
//!     let store = PgExecutionStore::new(create_pool(&db_config).await?);
//!     // ... build services and run server
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod cluster;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod hashing;
pub mod io_pool;
pub mod notebook;
pub mod notify;
pub mod result_ext;
pub mod services;
pub mod state;
pub mod storage;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
