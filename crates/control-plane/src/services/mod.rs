//! Service layer for the NBForge Control Plane.
//!
//! Services encapsulate business logic and coordinate
//! between handlers, the record store and the cluster.

pub mod callback;
pub mod execution;

pub use callback::CallbackGateway;
pub use execution::ExecutionService;
