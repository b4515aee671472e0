//! Shard lineage across invocations.

mod common;

use anyhow::Result;
use common::Harness;
use leaderboard_core::{SequenceNumber, ShardDescriptor, StatAggregate};
use leaderboard_runtime::{CheckpointRepository, PipelineError, StreamError};

fn index_of(order: &[String], shard_id: &str) -> usize {
    order
        .iter()
        .position(|id| id == shard_id)
        .unwrap_or_else(|| panic!("{} was not processed", shard_id))
}

/// parent (closed) → two children, each child carrying records.
fn split_stream(h: &Harness) {
    h.open_shard("parent", 1);
    h.insert("parent", 1, "u1", &[("wins", 1.0)]);
    h.insert("parent", 2, "u2", &[("wins", 2.0)]);
    h.stream.close_shard("parent").expect("parent closes");

    // Children sort before the parent by id; lineage must still win.
    h.child_shard("a-left", "parent", 10);
    h.child_shard("a-right", "parent", 20);
    h.insert("a-left", 10, "u3", &[("wins", 3.0)]);
    h.insert("a-right", 20, "u4", &[("wins", 4.0)]);
}

#[tokio::test]
async fn test_parent_is_processed_before_children() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 10)], 1);
    split_stream(&h);

    let summary = h.pipeline.run_invocation().await?;

    let order = &summary.shards_processed;
    assert_eq!(order.len(), 3);
    assert!(index_of(order, "parent") < index_of(order, "a-left"));
    assert!(index_of(order, "parent") < index_of(order, "a-right"));
    assert_eq!(h.checkpoints.get("parent").await?, Some(SequenceNumber::from(2u64)));
    assert_eq!(summary.admissions, 4);
    Ok(())
}

#[tokio::test]
async fn test_drained_parent_is_skipped_next_time() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 10)], 1);
    split_stream(&h);
    h.pipeline.run_invocation().await?;

    h.insert("a-left", 11, "u5", &[("wins", 5.0)]);
    let summary = h.pipeline.run_invocation().await?;

    assert_eq!(summary.shards_skipped, 1);
    assert!(!summary.shards_processed.contains(&"parent".to_string()));
    assert_eq!(summary.records_read, 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_parent_blocks_children_until_retried() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 10)], 1);
    split_stream(&h);
    // Two attempts per call: the parent's first page fetch exhausts its retries.
    h.stream
        .fail_next_pages([StreamError::Unavailable("down".into()), StreamError::Throttled])?;

    let summary = h.pipeline.run_invocation().await?;

    assert!(summary.is_partial_failure());
    assert_eq!(summary.failed_shard_ids(), vec!["parent"]);
    assert!(summary.shards_processed.is_empty());
    let mut blocked = summary.shards_blocked.clone();
    blocked.sort();
    assert_eq!(blocked, vec!["a-left".to_string(), "a-right".to_string()]);
    assert_eq!(h.checkpoints.get("parent").await?, None);

    let retry = h.pipeline.run_invocation().await?;
    assert!(retry.is_complete());
    assert_eq!(retry.shards_processed.len(), 3);
    assert_eq!(retry.admissions, 4);
    Ok(())
}

#[tokio::test]
async fn test_expired_parent_makes_child_a_root() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 10)], 1);
    split_stream(&h);
    h.stream.expire_shard("parent")?;

    let summary = h.pipeline.run_invocation().await?;

    let mut processed = summary.shards_processed.clone();
    processed.sort();
    assert_eq!(processed, vec!["a-left".to_string(), "a-right".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_lineage_cycle_aborts_invocation() -> Result<()> {
    let h = Harness::new(Vec::new(), 1);
    h.stream
        .add_shard(ShardDescriptor::open("x", 1u64).with_parent("y"))?;
    h.stream
        .add_shard(ShardDescriptor::open("y", 1u64).with_parent("x"))?;

    let err = h.pipeline.run_invocation().await.unwrap_err();

    assert!(matches!(err, PipelineError::Topology(_)));
    assert!(err.is_fatal());
    assert!(h.checkpoints.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_closed_shard_drained_across_many_pages() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 100)], 1);
    h.open_shard("old", 100);
    for seq in 100..=130u64 {
        h.insert("old", seq, &format!("u{}", seq), &[("wins", seq as f64)]);
    }
    h.stream.close_shard("old")?;

    let summary = h.pipeline.run_invocation().await?;

    assert_eq!(summary.records_read, 31);
    assert!(summary.pages_fetched >= 8);
    assert!(summary.is_complete());
    assert_eq!(h.checkpoints.get("old").await?, Some(SequenceNumber::from("130")));

    let again = h.pipeline.run_invocation().await?;
    assert_eq!(again.shards_skipped, 1);
    assert_eq!(again.pages_fetched, 0);
    Ok(())
}
