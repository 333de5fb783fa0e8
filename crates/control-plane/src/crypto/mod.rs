//! Cryptography module for the NBForge Control Plane.
//!
//! Provides per-execution callback tokens and their constant-time
//! verification.

pub mod token;

pub use token::{generate_callback_token, tokens_match, CALLBACK_TOKEN_LENGTH};
