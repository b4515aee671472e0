//! Invocation outcome reported to callers.

use std::time::Duration;

use leaderboard_core::ShardId;

/// A shard whose checkpoint did not advance in this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub reason: String,
}

/// What one invocation did.
///
/// Callers can re-invoke safely after a partial failure: shards listed in
/// `shards_failed`, `shards_incomplete` or `shards_blocked` resume from their
/// last checkpoint next time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationSummary {
    pub stream_id: String,
    /// Shards read, applied and checkpointed.
    pub shards_processed: Vec<ShardId>,
    /// Closed shards already drained by an earlier invocation.
    pub shards_skipped: usize,
    pub shards_failed: Vec<ShardFailure>,
    /// Closed shards applied but not drained within the page-fetch budget.
    pub shards_incomplete: Vec<ShardId>,
    /// Shards never offered because an ancestor was held back or time ran out.
    pub shards_blocked: Vec<ShardId>,
    pub pages_fetched: u64,
    pub empty_page_retries: u64,
    pub records_read: u64,
    pub records_reduced: u64,
    pub anomalies: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub updates: u64,
    pub removals: u64,
    pub evictions: u64,
    pub deadline_reached: bool,
    pub elapsed: Duration,
}

impl InvocationSummary {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            ..Self::default()
        }
    }

    /// True if any shard failed to advance because of an error.
    pub fn is_partial_failure(&self) -> bool {
        !self.shards_failed.is_empty()
    }

    /// True if every shard offered by the topology was fully handled.
    pub fn is_complete(&self) -> bool {
        self.shards_failed.is_empty()
            && self.shards_incomplete.is_empty()
            && self.shards_blocked.is_empty()
            && !self.deadline_reached
    }

    pub fn failed_shard_ids(&self) -> Vec<&str> {
        self.shards_failed
            .iter()
            .map(|failure| failure.shard_id.as_str())
            .collect()
    }
}
