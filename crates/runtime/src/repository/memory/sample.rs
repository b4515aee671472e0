//! In-memory sample table keyed by (stat, user).

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use leaderboard_core::{SampleEntry, StatName, StatValue, UserId};

use super::FailurePlan;
use crate::repository::{RepositoryError, Result, SampleRepository};

/// In-memory implementation of SampleRepository.
///
/// Entries are partitioned by stat so `query_stat` is a single map lookup.
#[derive(Debug, Default)]
pub struct InMemorySampleRepository {
    partitions: RwLock<BTreeMap<StatName, BTreeMap<UserId, StatValue>>>,
    write_failures: FailurePlan,
    read_failures: FailurePlan,
    batch_writes: AtomicU64,
}

impl InMemorySampleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `calls` batched writes fail.
    pub fn fail_next_writes(&self, calls: u32) {
        self.write_failures.arm(calls);
    }

    /// Make the next `calls` stat queries fail.
    pub fn fail_next_reads(&self, calls: u32) {
        self.read_failures.arm(calls);
    }

    /// Number of sampled entries for a stat.
    pub fn sample_size(&self, stat: &str) -> Result<usize> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(partitions.get(stat).map_or(0, BTreeMap::len))
    }

    /// Number of successful batched writes, for asserting write grouping.
    pub fn batch_write_count(&self) -> u64 {
        self.batch_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SampleRepository for InMemorySampleRepository {
    async fn query_stat(&self, stat: &str) -> Result<Vec<SampleEntry>> {
        self.read_failures.check("sample query")?;

        let partitions = self
            .partitions
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;

        Ok(partitions
            .get(stat)
            .map(|users| {
                users
                    .iter()
                    .map(|(user, value)| SampleEntry::new(stat, user.clone(), *value))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn batch_write(&self, puts: &[SampleEntry], deletes: &[(StatName, UserId)]) -> Result<()> {
        self.write_failures.check("sample batch write")?;

        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;

        for entry in puts {
            partitions
                .entry(entry.stat.clone())
                .or_default()
                .insert(entry.user.clone(), entry.value);
        }
        for (stat, user) in deletes {
            if let Some(users) = partitions.get_mut(stat) {
                users.remove(user);
                if users.is_empty() {
                    partitions.remove(stat);
                }
            }
        }

        self.batch_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
