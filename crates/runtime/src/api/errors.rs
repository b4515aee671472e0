//! Unified error types surfaced by the pipeline API.
//!
//! Wraps failures from the stream source, repositories, and lineage
//! validation so callers can bubble them up with consistent context.
use std::time::Duration;

use leaderboard_core::TopologyError;
use thiserror::Error;

pub use crate::repository::RepositoryError;
pub use crate::stream::StreamError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("invalid shard lineage: {0}")]
    Topology(#[from] TopologyError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("pipeline requires a {0} before building")]
    MissingCollaborator(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Repository(err) => err.is_transient(),
            Self::Stream(err) => err.is_transient(),
            Self::Timeout { .. } => true,
            Self::Topology(_)
            | Self::RetriesExhausted { .. }
            | Self::MissingCollaborator(_)
            | Self::InvalidConfig(_) => false,
        }
    }

    /// Returns true if the whole invocation must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Topology(_) | Self::MissingCollaborator(_) | Self::InvalidConfig(_)
        )
    }
}
