//! Runtime orchestration for the leaderboard sampling pipeline.
//!
//! This crate wires the pure domain logic of `leaderboard-core` to the
//! external collaborators (change stream, checkpoint table, sample and
//! aggregate tables) and drives invocations over them. Consumers embed
//! [`Pipeline`] and call [`Pipeline::run_invocation`] on a schedule.
//!
//! Modules are organized by responsibility:
//! - [`pipeline`] hosts the driver and its builder
//! - [`api`] exposes the error and summary types callers interact with
//! - [`stream`] abstracts the change stream and reads shards
//! - [`sample`] and [`writer`] maintain the bounded sample
//! - [`repository`] provides the table contracts and adapters
//! - [`query`] answers approximate ranking questions from the sample
pub mod api;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod repository;
pub mod retry;
pub mod sample;
pub mod stream;
pub mod writer;

pub use api::{InvocationSummary, PipelineError, Result, ShardFailure};
pub use config::{PipelineConfig, RetryPolicy};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use query::{LeaderboardQuery, RankEstimate};
pub use repository::{
    AggregateRepository, CheckpointRepository, FileCheckpointRepository,
    InMemoryAggregateRepository, InMemoryCheckpointRepository, InMemorySampleRepository,
    RepositoryError, SampleRepository,
};
pub use retry::with_retry;
pub use sample::{FlushReport, SampleStore};
pub use stream::{
    InMemoryStream, IteratorPosition, IteratorToken, Page, ShardBatch, ShardReader, StreamError,
    StreamSource,
};
pub use writer::{ApplyReport, LeaderboardWriter};
