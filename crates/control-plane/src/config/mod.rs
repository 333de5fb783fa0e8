//! Configuration module for the NBForge Control Plane server.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod app;
mod cluster;
mod database;
mod rate_limit;
mod storage;

pub use app::{AppConfig, StoreBackend};
pub use cluster::{ClusterConfig, SchedulerBackend};
pub use database::DatabaseConfig;
pub use rate_limit::RateLimitConfig;
pub use storage::{StorageBackend, StorageConfig};
