//! Shared harness for pipeline integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use leaderboard_core::{ChangeEvent, FieldImage, ShardDescriptor, StatAggregate};
use leaderboard_runtime::{
    InMemoryAggregateRepository, InMemoryCheckpointRepository, InMemorySampleRepository,
    InMemoryStream, Pipeline, PipelineConfig, RetryPolicy,
};

pub const STREAM: &str = "player-stats";

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn image(fields: &[(&str, f64)]) -> FieldImage {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig::new(STREAM)
        .with_page_limit(4)
        .with_page_fetch_budget(3)
        .with_retry(RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
        })
}

/// In-memory collaborators plus a pipeline built over them.
pub struct Harness {
    pub stream: Arc<InMemoryStream>,
    pub checkpoints: Arc<InMemoryCheckpointRepository>,
    pub samples: Arc<InMemorySampleRepository>,
    pub aggregates: Arc<InMemoryAggregateRepository>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(aggregates: Vec<StatAggregate>, seed: u64) -> Self {
        Self::with_config(fast_config(), aggregates, seed)
    }

    pub fn with_config(config: PipelineConfig, aggregates: Vec<StatAggregate>, seed: u64) -> Self {
        init_tracing();
        let stream = Arc::new(InMemoryStream::new(STREAM));
        let checkpoints = Arc::new(InMemoryCheckpointRepository::new());
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::with_aggregates(aggregates));

        let pipeline = Pipeline::builder()
            .config(config)
            .source(stream.clone())
            .checkpoints(checkpoints.clone())
            .samples(samples.clone())
            .aggregates(aggregates.clone())
            .seed(seed)
            .build()
            .expect("pipeline should build");

        Self {
            stream,
            checkpoints,
            samples,
            aggregates,
            pipeline,
        }
    }

    pub fn open_shard(&self, shard_id: &str, starting: u64) {
        self.stream
            .add_shard(ShardDescriptor::open(shard_id, starting))
            .expect("shard should register");
    }

    pub fn child_shard(&self, shard_id: &str, parent: &str, starting: u64) {
        self.stream
            .add_shard(ShardDescriptor::open(shard_id, starting).with_parent(parent))
            .expect("shard should register");
    }

    pub fn insert(&self, shard_id: &str, seq: u64, user: &str, fields: &[(&str, f64)]) {
        self.stream
            .append(ChangeEvent::insert(shard_id, seq, user, image(fields)))
            .expect("append should succeed");
    }

    pub fn update(
        &self,
        shard_id: &str,
        seq: u64,
        user: &str,
        before: &[(&str, f64)],
        after: &[(&str, f64)],
    ) {
        self.stream
            .append(ChangeEvent::update(shard_id, seq, user, image(before), image(after)))
            .expect("append should succeed");
    }
}
