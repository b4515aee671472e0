//! Repository contracts for the durable tables the pipeline reads and writes.
//!
//! All three tables are external collaborators. The runtime only relies on
//! the operations below, so any store with batched writes and a range query
//! by stat can back a deployment.

use async_trait::async_trait;
use leaderboard_core::{SampleEntry, SequenceNumber, ShardCheckpoint, StatAggregate, StatName, UserId};

use super::error::Result;

/// Durable mapping from shard to last consumed position.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Load the checkpoint of a shard, if one was ever written.
    async fn get(&self, shard_id: &str) -> Result<Option<SequenceNumber>>;

    /// Upsert a checkpoint.
    ///
    /// A checkpoint never moves backwards: writing an older position is a
    /// no-op. Returns whether the stored position advanced.
    async fn put(&self, checkpoint: &ShardCheckpoint) -> Result<bool>;

    /// List all stored checkpoints.
    async fn list(&self) -> Result<Vec<ShardCheckpoint>>;
}

/// Backing table of sample entries, keyed by (stat, user).
#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// Range query: every sampled entry of a stat.
    async fn query_stat(&self, stat: &str) -> Result<Vec<SampleEntry>>;

    /// Apply puts and deletes as one batched write.
    ///
    /// Deleting an absent key and re-putting an identical entry are no-ops.
    async fn batch_write(&self, puts: &[SampleEntry], deletes: &[(StatName, UserId)]) -> Result<()>;
}

/// Backing table of per-stat aggregates, keyed by stat.
#[async_trait]
pub trait AggregateRepository: Send + Sync {
    async fn get(&self, stat: &str) -> Result<Option<StatAggregate>>;

    /// Upsert several aggregates as one batched write.
    async fn batch_put(&self, aggregates: &[StatAggregate]) -> Result<()>;

    async fn list_stats(&self) -> Result<Vec<StatName>>;
}
