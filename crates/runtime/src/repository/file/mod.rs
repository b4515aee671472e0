//! File-based repository implementations.

mod checkpoint;

pub use checkpoint::FileCheckpointRepository;
