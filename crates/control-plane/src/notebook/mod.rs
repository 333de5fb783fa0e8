//! Notebook documents: metadata extraction and parameter typing.

mod coerce;
mod metadata;

pub use coerce::{coerce_parameters, coerce_value};
pub use metadata::{NotebookMetadata, ParameterSpec, ResourceHints};
