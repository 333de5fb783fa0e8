//! Database models for the NBForge Control Plane.
//!
//! This module contains SQLx-compatible model definitions
//! for all database tables.

pub mod execution;

pub use execution::*;
