//! Repository layer for the durable tables behind the pipeline.
//!
//! Repositories hold data that outlives an invocation:
//! - Shard checkpoints (where to resume each shard)
//! - Sample entries (the bounded per-stat sample)
//! - Stat aggregates (population, capacity, high score)
//!
//! In-memory implementations back tests and local runs; the file checkpoint
//! store survives process restarts.

mod error;
mod file;
mod memory;
mod traits;

pub use error::{RepositoryError, Result};
pub use file::FileCheckpointRepository;
pub use memory::{
    InMemoryAggregateRepository, InMemoryCheckpointRepository, InMemorySampleRepository,
};
pub use traits::{AggregateRepository, CheckpointRepository, SampleRepository};
