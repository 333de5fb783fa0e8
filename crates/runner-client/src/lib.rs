//! NBForge Runner Client
//!
//! Used inside a notebook runner workload to report execution status back to
//! the control plane.
//!
//! This crate provides:
//! - Runner configuration from the workload environment
//! - A callback client that authenticates with the per-execution token
//! - Bounded exponential backoff for transient failures

pub mod client;
pub mod config;
pub mod error;

pub use client::{CallbackClient, ReportStatus, RetryPolicy, StatusReport};
pub use config::RunnerConfig;
pub use error::CallbackError;
