//! Common type aliases used throughout the pipeline.
//!
//! These type aliases provide semantic clarity for primitive types
//! that are used with specific meanings across crates.

/// Identifier of a change-stream shard
pub type ShardId = String;

/// Player identifier (partition key of the source statistics table)
pub type UserId = String;

/// Name of a tracked statistic ("wins", "kills", ...)
pub type StatName = String;

/// Value of a statistic for one player
pub type StatValue = f64;
