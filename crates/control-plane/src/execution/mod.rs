//! Execution records: the unit of tracked notebook work.

mod model;
mod owner;
mod status;

pub use model::{
    Execution, ExecutionHashes, NewExecution, Parameters, ResourceRequest, StatusFields,
};
pub use owner::Owner;
pub use status::ExecutionStatus;

#[cfg(test)]
pub(crate) use model::fixtures;
