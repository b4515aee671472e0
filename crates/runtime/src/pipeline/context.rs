//! Per-invocation bookkeeping.

use std::time::{Duration, Instant};

use leaderboard_core::{Reduction, ShardId};

use crate::api::{InvocationSummary, PipelineError, ShardFailure};
use crate::stream::ShardBatch;
use crate::writer::ApplyReport;

/// Counters and deadline owned by a single invocation.
///
/// Nothing here is shared between invocations, so two consumers running at
/// once never see each other's counts.
#[derive(Debug)]
pub(crate) struct InvocationContext {
    started: Instant,
    budget: Duration,
    pub(crate) summary: InvocationSummary,
}

impl InvocationContext {
    pub(crate) fn new(stream_id: &str, budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            summary: InvocationSummary::new(stream_id),
        }
    }

    pub(crate) fn deadline_reached(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub(crate) fn record_batch(&mut self, batch: &ShardBatch) {
        self.summary.pages_fetched += batch.pages_fetched;
        self.summary.empty_page_retries += batch.empty_retries;
        self.summary.records_read += batch.events.len() as u64;
    }

    pub(crate) fn record_reduction(&mut self, reduction: &Reduction) {
        self.summary.records_reduced += reduction.records.len() as u64;
        self.summary.anomalies += reduction.anomalies.len() as u64;
    }

    pub(crate) fn record_apply(&mut self, report: &ApplyReport) {
        self.summary.admissions += report.admissions;
        self.summary.rejections += report.rejections;
        self.summary.updates += report.updates + report.replays;
        self.summary.removals += report.removals;
        self.summary.evictions += report.evictions;
    }

    pub(crate) fn record_processed(&mut self, shard_id: &str) {
        self.summary.shards_processed.push(shard_id.to_string());
    }

    pub(crate) fn record_incomplete(&mut self, shard_id: &str) {
        self.summary.shards_incomplete.push(shard_id.to_string());
    }

    pub(crate) fn record_failure(&mut self, shard_id: &str, error: &PipelineError) {
        self.summary.shards_failed.push(ShardFailure {
            shard_id: shard_id.to_string(),
            reason: error.to_string(),
        });
    }

    /// Whether a shard already has an outcome in this invocation.
    pub(crate) fn has_outcome(&self, shard_id: &str) -> bool {
        self.summary.shards_processed.iter().any(|id| id == shard_id)
            || self.summary.shards_incomplete.iter().any(|id| id == shard_id)
            || self
                .summary
                .shards_failed
                .iter()
                .any(|failure| failure.shard_id == shard_id)
    }

    pub(crate) fn finish(mut self, blocked: Vec<ShardId>) -> InvocationSummary {
        self.summary.shards_blocked = blocked;
        self.summary.elapsed = self.started.elapsed();
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_already_spent() {
        let ctx = InvocationContext::new("stats", Duration::ZERO);
        assert!(ctx.deadline_reached());
        let ctx = InvocationContext::new("stats", Duration::from_secs(60));
        assert!(!ctx.deadline_reached());
    }

    #[test]
    fn test_outcomes_are_tracked() {
        let mut ctx = InvocationContext::new("stats", Duration::from_secs(60));
        ctx.record_processed("a");
        ctx.record_failure("b", &PipelineError::InvalidConfig("x".into()));
        assert!(ctx.has_outcome("a"));
        assert!(ctx.has_outcome("b"));
        assert!(!ctx.has_outcome("c"));

        let summary = ctx.finish(vec!["c".into()]);
        assert!(summary.is_partial_failure());
        assert_eq!(summary.failed_shard_ids(), vec!["b"]);
        assert_eq!(summary.shards_blocked, vec!["c".to_string()]);
    }
}
