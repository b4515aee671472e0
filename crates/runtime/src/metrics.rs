//! Cumulative pipeline metrics across invocations.
//!
//! Per-invocation numbers live in [`crate::InvocationSummary`]; this tracker
//! only accumulates them so a long-lived host can report totals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::InvocationSummary;

/// Lock-free counters shared by every pipeline built with the same handle.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    invocations: AtomicU64,
    /// Invocations that left at least one shard failed.
    partial_failures: AtomicU64,
    shards_processed: AtomicU64,
    shard_failures: AtomicU64,
    records_read: AtomicU64,
    records_reduced: AtomicU64,
    anomalies: AtomicU64,
    admissions: AtomicU64,
    rejections: AtomicU64,
    evictions: AtomicU64,
    total_elapsed_nanos: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one finished invocation into the totals.
    pub fn record_invocation(&self, summary: &InvocationSummary) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if summary.is_partial_failure() {
            self.partial_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.shards_processed
            .fetch_add(summary.shards_processed.len() as u64, Ordering::Relaxed);
        self.shard_failures
            .fetch_add(summary.shards_failed.len() as u64, Ordering::Relaxed);
        self.records_read
            .fetch_add(summary.records_read, Ordering::Relaxed);
        self.records_reduced
            .fetch_add(summary.records_reduced, Ordering::Relaxed);
        self.anomalies.fetch_add(summary.anomalies, Ordering::Relaxed);
        self.admissions
            .fetch_add(summary.admissions, Ordering::Relaxed);
        self.rejections
            .fetch_add(summary.rejections, Ordering::Relaxed);
        self.evictions.fetch_add(summary.evictions, Ordering::Relaxed);
        self.total_elapsed_nanos
            .fetch_add(summary.elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn partial_failures(&self) -> u64 {
        self.partial_failures.load(Ordering::Relaxed)
    }

    /// Share of observed new members that were admitted, in 0-1.
    pub fn admission_rate(&self) -> f64 {
        let admitted = self.admissions.load(Ordering::Relaxed);
        let total = admitted + self.rejections.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            admitted as f64 / total as f64
        }
    }

    pub fn avg_invocation_time(&self) -> Duration {
        let invocations = self.invocations();
        if invocations == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_elapsed_nanos.load(Ordering::Relaxed) / invocations)
        }
    }

    /// Reads every counter.
    ///
    /// Fields are read one at a time, so a snapshot taken during a concurrent
    /// invocation may mix before/after values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations(),
            partial_failures: self.partial_failures(),
            shards_processed: self.shards_processed.load(Ordering::Relaxed),
            shard_failures: self.shard_failures.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_reduced: self.records_reduced.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            admission_rate: self.admission_rate(),
            avg_invocation_time: self.avg_invocation_time(),
        }
    }
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub partial_failures: u64,
    pub shards_processed: u64,
    pub shard_failures: u64,
    pub records_read: u64,
    pub records_reduced: u64,
    pub anomalies: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub admission_rate: f64,
    pub avg_invocation_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ShardFailure;

    #[test]
    fn test_invocations_accumulate() {
        let metrics = PipelineMetrics::new();
        let mut summary = InvocationSummary::new("stats");
        summary.shards_processed = vec!["a".into(), "b".into()];
        summary.admissions = 3;
        summary.rejections = 1;
        summary.elapsed = Duration::from_millis(10);
        metrics.record_invocation(&summary);

        summary.shards_failed.push(ShardFailure {
            shard_id: "c".into(),
            reason: "down".into(),
        });
        metrics.record_invocation(&summary);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations, 2);
        assert_eq!(snapshot.partial_failures, 1);
        assert_eq!(snapshot.shards_processed, 4);
        assert_eq!(snapshot.shard_failures, 1);
        assert_eq!(snapshot.admission_rate, 0.75);
        assert_eq!(snapshot.avg_invocation_time, Duration::from_millis(10));
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.admission_rate(), 0.0);
        assert_eq!(metrics.avg_invocation_time(), Duration::ZERO);
    }
}
