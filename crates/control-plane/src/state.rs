//! Application state for the NBForge Control Plane server.
//!
//! Shared by the health endpoints. Domain routes carry their own service as
//! router state.

use crate::config::AppConfig;
use crate::db::DbPool;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool; `None` when records are kept in memory
    pub db: Option<DbPool>,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(db: Option<DbPool>, config: AppConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn has_database(&self) -> bool {
        self.db.is_some()
    }
}
