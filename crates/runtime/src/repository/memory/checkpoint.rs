//! In-memory checkpoint repository implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use leaderboard_core::{SequenceNumber, ShardCheckpoint, ShardId};

use super::FailurePlan;
use crate::repository::{CheckpointRepository, RepositoryError, Result};

/// In-memory checkpoint repository for testing and development.
///
/// Thread-safe but not persistent across process restarts.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    checkpoints: RwLock<HashMap<ShardId, SequenceNumber>>,
    put_failures: FailurePlan,
}

impl InMemoryCheckpointRepository {
    /// Create a new empty in-memory checkpoint repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `calls` invocations of `put` fail.
    pub fn fail_next_puts(&self, calls: u32) {
        self.put_failures.arm(calls);
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn get(&self, shard_id: &str) -> Result<Option<SequenceNumber>> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;

        Ok(checkpoints.get(shard_id).cloned())
    }

    async fn put(&self, checkpoint: &ShardCheckpoint) -> Result<bool> {
        self.put_failures.check("checkpoint put")?;

        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;

        match checkpoints.get(&checkpoint.shard_id) {
            Some(current) if *current >= checkpoint.last_sequence_number => Ok(false),
            _ => {
                checkpoints.insert(
                    checkpoint.shard_id.clone(),
                    checkpoint.last_sequence_number.clone(),
                );
                Ok(true)
            }
        }
    }

    async fn list(&self) -> Result<Vec<ShardCheckpoint>> {
        let checkpoints = self
            .checkpoints
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;

        let mut all: Vec<ShardCheckpoint> = checkpoints
            .iter()
            .map(|(shard_id, sequence)| ShardCheckpoint::new(shard_id.clone(), sequence.clone()))
            .collect();
        all.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_never_regresses() {
        let repo = InMemoryCheckpointRepository::new();
        assert!(repo.put(&ShardCheckpoint::new("s", "130")).await.unwrap());
        assert!(!repo.put(&ShardCheckpoint::new("s", "100")).await.unwrap());
        assert!(!repo.put(&ShardCheckpoint::new("s", "130")).await.unwrap());
        assert_eq!(repo.get("s").await.unwrap(), Some(SequenceNumber::from("130")));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let repo = InMemoryCheckpointRepository::new();
        repo.fail_next_puts(1);
        let err = repo.put(&ShardCheckpoint::new("s", "1")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(repo.put(&ShardCheckpoint::new("s", "1")).await.unwrap());
    }
}
