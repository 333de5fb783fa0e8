//! Database queries for the NBForge Control Plane.
//!
//! This module contains database query functions organized by domain.

pub mod execution;
