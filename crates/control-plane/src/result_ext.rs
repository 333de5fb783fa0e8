//! Result extension trait for logging errors with context.
//!
//! Cleanup paths (bundle deletion, notification dispatch, reconciliation
//! writes) must never mask the primary outcome of an operation. These helpers
//! record such secondary failures with the caller's source location.

use std::fmt::Display;
use tracing::{error, warn};

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with context if this is an `Err` variant.
    ///
    /// Returns the original `Result` unchanged.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Log the error as a warning and discard it.
    ///
    /// Used for best-effort steps whose failure is secondary.
    fn best_effort<S: ToString>(self, context: S) -> Option<T>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "nbforge_control_plane",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }

    #[track_caller]
    fn best_effort<S: ToString>(self, context: S) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                let caller_location = std::panic::Location::caller();
                warn!(
                    target: "nbforge_control_plane",
                    error = %e,
                    file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                    context = %context.to_string(),
                    "Best-effort operation failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_ok() {
        let result: Result<i32, &str> = Ok(42);
        let logged = result.log("test context");
        assert_eq!(logged.unwrap(), 42);
    }

    #[test]
    fn test_result_ext_err() {
        let result: Result<i32, &str> = Err("test error");
        let logged = result.log("test context");
        assert!(logged.is_err());
    }

    #[test]
    fn test_best_effort_swallows_error() {
        let result: Result<i32, &str> = Err("delete failed");
        assert_eq!(result.best_effort("deleting config bundle"), None);

        let result: Result<i32, &str> = Ok(7);
        assert_eq!(result.best_effort("deleting config bundle"), Some(7));
    }
}
