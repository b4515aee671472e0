//! Public pipeline API surface.
//!
//! This module gathers the types exposed to consumers of the runtime crate so
//! other layers can stay focused on reading, sampling, or storage.

pub mod errors;
pub mod summary;

pub use errors::{PipelineError, Result};
pub use summary::{InvocationSummary, ShardFailure};
