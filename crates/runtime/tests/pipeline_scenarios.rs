//! End-to-end invocations over in-memory collaborators.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Harness, STREAM, fast_config};
use leaderboard_core::{HighScore, SampleEntry, SequenceNumber, StatAggregate};
use leaderboard_runtime::{
    AggregateRepository, CheckpointRepository, FileCheckpointRepository,
    InMemoryAggregateRepository, InMemorySampleRepository, InMemoryStream, Pipeline,
    SampleRepository,
};

#[tokio::test]
async fn test_first_insert_is_admitted_into_empty_stat() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 5)], 1);
    h.open_shard("shard-0", 1);
    h.insert("shard-0", 1, "U1", &[("wins", 10.0)]);

    let summary = h.pipeline.run_invocation().await?;

    assert!(summary.is_complete());
    assert_eq!(summary.shards_processed, vec!["shard-0".to_string()]);
    assert_eq!(summary.records_read, 1);
    assert_eq!(summary.admissions, 1);

    let aggregate = h.aggregates.get("wins").await?.expect("aggregate exists");
    assert_eq!(aggregate.population, 1);
    assert_eq!(
        h.samples.query_stat("wins").await?,
        vec![SampleEntry::new("wins", "U1", 10.0)]
    );
    assert_eq!(h.checkpoints.get("shard-0").await?, Some(SequenceNumber::from(1u64)));
    Ok(())
}

#[tokio::test]
async fn test_update_of_sampled_user_moves_value_and_high_score() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 5)], 1);
    h.open_shard("shard-0", 1);
    h.insert("shard-0", 1, "U1", &[("wins", 10.0)]);
    h.pipeline.run_invocation().await?;

    h.update("shard-0", 2, "U1", &[("wins", 10.0)], &[("wins", 15.0)]);
    let summary = h.pipeline.run_invocation().await?;

    assert_eq!(summary.records_read, 1);
    assert_eq!(summary.updates, 1);
    assert_eq!(
        h.samples.query_stat("wins").await?,
        vec![SampleEntry::new("wins", "U1", 15.0)]
    );
    let aggregate = h.aggregates.get("wins").await?.expect("aggregate exists");
    assert_eq!(aggregate.high_score, Some(HighScore::new("U1", 15.0)));
    assert_eq!(aggregate.population, 1);
    Ok(())
}

#[tokio::test]
async fn test_new_then_delete_restores_population() -> Result<()> {
    let mut seeded = StatAggregate::new("wins", 100);
    seeded.population = 7;
    let h = Harness::new(vec![seeded], 3);
    h.open_shard("shard-0", 1);

    h.insert("shard-0", 1, "U1", &[("wins", 4.0)]);
    h.pipeline.run_invocation().await?;
    assert_eq!(h.aggregates.get("wins").await?.map(|a| a.population), Some(8));

    h.update("shard-0", 2, "U1", &[("wins", 4.0)], &[]);
    h.pipeline.run_invocation().await?;

    assert_eq!(h.aggregates.get("wins").await?.map(|a| a.population), Some(7));
    assert!(h.samples.query_stat("wins").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sample_never_exceeds_capacity() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 10)], 99);
    h.open_shard("shard-0", 1);

    let mut seq = 1;
    for round in 0..5 {
        for i in 0..12 {
            h.insert("shard-0", seq, &format!("u{}-{}", round, i), &[("wins", seq as f64)]);
            seq += 1;
        }
        h.pipeline.run_invocation().await?;
        assert!(h.samples.sample_size("wins")? <= 10);
    }

    let aggregate = h.aggregates.get("wins").await?.expect("aggregate exists");
    assert_eq!(aggregate.population, 60);
    assert_eq!(h.samples.sample_size("wins")?, 10);
    assert_eq!(
        aggregate.high_score,
        Some(HighScore::new("u4-11", 60.0))
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_stat_gets_default_capacity() -> Result<()> {
    let config = fast_config().with_default_max_sample_size(2);
    let h = Harness::with_config(config, Vec::new(), 5);
    h.open_shard("shard-0", 1);
    for seq in 1..=6u64 {
        h.insert("shard-0", seq, &format!("u{}", seq), &[("kills", 1.0)]);
    }

    h.pipeline.run_invocation().await?;

    let aggregate = h.aggregates.get("kills").await?.expect("aggregate created");
    assert_eq!(aggregate.max_sample_size, 2);
    assert_eq!(aggregate.population, 6);
    assert_eq!(h.samples.sample_size("kills")?, 2);
    Ok(())
}

#[tokio::test]
async fn test_ambiguous_events_are_skipped_and_counted() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 5)], 1);
    h.open_shard("shard-0", 1);
    h.insert("shard-0", 1, "U1", &[("wins", 1.0), ("losses", 2.0)]);
    h.insert("shard-0", 2, "U2", &[("wins", 3.0)]);

    let summary = h.pipeline.run_invocation().await?;

    assert_eq!(summary.records_read, 2);
    assert_eq!(summary.anomalies, 1);
    assert_eq!(summary.records_reduced, 1);
    assert!(h.samples.query_stat("losses").await?.is_empty());
    // The checkpoint still moves past the skipped event.
    assert_eq!(h.checkpoints.get("shard-0").await?, Some(SequenceNumber::from(2u64)));
    Ok(())
}

#[tokio::test]
async fn test_rerun_without_new_events_changes_nothing() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 5)], 1);
    h.open_shard("shard-0", 1);
    h.insert("shard-0", 1, "U1", &[("wins", 10.0)]);
    h.pipeline.run_invocation().await?;
    let writes = h.samples.batch_write_count();

    let summary = h.pipeline.run_invocation().await?;

    assert_eq!(summary.records_read, 0);
    assert_eq!(summary.shards_processed, vec!["shard-0".to_string()]);
    assert_eq!(h.samples.batch_write_count(), writes);
    Ok(())
}

#[tokio::test]
async fn test_file_checkpoints_survive_pipeline_restart() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let stream = Arc::new(InMemoryStream::new(STREAM));
    stream.add_shard(leaderboard_core::ShardDescriptor::open("shard-0", 1u64))?;
    for seq in 1..=3u64 {
        stream.append(leaderboard_core::ChangeEvent::insert(
            "shard-0",
            seq,
            format!("u{}", seq),
            common::image(&[("wins", seq as f64)]),
        ))?;
    }
    let samples = Arc::new(InMemorySampleRepository::new());
    let aggregates = Arc::new(InMemoryAggregateRepository::new());

    let build = || -> Result<Pipeline> {
        Ok(Pipeline::builder()
            .config(fast_config())
            .source(stream.clone())
            .checkpoints(Arc::new(FileCheckpointRepository::new(dir.path(), STREAM)?))
            .samples(samples.clone())
            .aggregates(aggregates.clone())
            .seed(1)
            .build()?)
    };

    let first = build()?.run_invocation().await?;
    assert_eq!(first.records_read, 3);

    let second = build()?.run_invocation().await?;
    assert_eq!(second.records_read, 0);
    assert_eq!(samples.sample_size("wins")?, 3);
    assert_eq!(aggregates.get("wins").await?.map(|a| a.population), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_query_reflects_applied_batches() -> Result<()> {
    let h = Harness::new(vec![StatAggregate::new("wins", 50)], 1);
    h.open_shard("shard-0", 1);
    for seq in 1..=10u64 {
        h.insert("shard-0", seq, &format!("u{:02}", seq), &[("wins", seq as f64)]);
    }
    h.pipeline.run_invocation().await?;

    let query = h.pipeline.query();
    assert_eq!(query.population("wins").await?, 10);
    let leaders = query.sample_leaders("wins", 2).await?;
    assert_eq!(leaders[0].user, "u10");
    let estimate = query.approximate_rank("wins", 8.5).await?.expect("stat exists");
    assert_eq!(estimate.rank, 3);

    let metrics = h.pipeline.metrics().snapshot();
    assert_eq!(metrics.invocations, 1);
    assert_eq!(metrics.admissions, 10);
    Ok(())
}
