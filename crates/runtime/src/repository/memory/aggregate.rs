//! In-memory aggregate table keyed by stat.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use leaderboard_core::{StatAggregate, StatName};

use super::FailurePlan;
use crate::repository::{AggregateRepository, RepositoryError, Result};

/// In-memory implementation of AggregateRepository.
#[derive(Debug, Default)]
pub struct InMemoryAggregateRepository {
    aggregates: RwLock<BTreeMap<StatName, StatAggregate>>,
    write_failures: FailurePlan,
    batch_puts: AtomicU64,
}

impl InMemoryAggregateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with aggregates already registered (e.g. per-stat capacities).
    pub fn with_aggregates(aggregates: impl IntoIterator<Item = StatAggregate>) -> Self {
        let map = aggregates
            .into_iter()
            .map(|aggregate| (aggregate.stat.clone(), aggregate))
            .collect();
        Self {
            aggregates: RwLock::new(map),
            write_failures: FailurePlan::default(),
            batch_puts: AtomicU64::new(0),
        }
    }

    /// Make the next `calls` batched puts fail.
    pub fn fail_next_writes(&self, calls: u32) {
        self.write_failures.arm(calls);
    }

    /// Number of successful batched puts.
    pub fn batch_put_count(&self) -> u64 {
        self.batch_puts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AggregateRepository for InMemoryAggregateRepository {
    async fn get(&self, stat: &str) -> Result<Option<StatAggregate>> {
        let aggregates = self
            .aggregates
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(aggregates.get(stat).cloned())
    }

    async fn batch_put(&self, batch: &[StatAggregate]) -> Result<()> {
        self.write_failures.check("aggregate batch put")?;

        let mut aggregates = self
            .aggregates
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        for aggregate in batch {
            aggregates.insert(aggregate.stat.clone(), aggregate.clone());
        }
        self.batch_puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list_stats(&self) -> Result<Vec<StatName>> {
        let aggregates = self
            .aggregates
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(aggregates.keys().cloned().collect())
    }
}
