//! Pipeline driver: topology → reader → reducer → writer → checkpoint.
//!
//! One call to [`Pipeline::run_invocation`] walks the shards of the stream
//! sequentially in lineage order. For each shard it reads new events,
//! reduces them, applies the result to the sample, and only then advances
//! the shard checkpoint. A failing shard is held back (with its descendants)
//! and reported in the summary; the other shards still advance.
//!
//! A batch re-read after a lost checkpoint may overlap events some stats
//! already counted. It is split at the highest applied mark so the overlap
//! is re-applied exactly as first reduced and the rest as a new batch.

mod context;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use leaderboard_core::{
    Anomaly, Reduction, SequenceNumber, ShardCheckpoint, ShardDescriptor, ShardId,
    TopologyResolver, reduce,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::api::{InvocationSummary, PipelineError, Result};
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::query::LeaderboardQuery;
use crate::repository::{AggregateRepository, CheckpointRepository, SampleRepository};
use crate::retry::with_retry;
use crate::sample::SampleStore;
use crate::stream::{ShardReader, StreamSource};
use crate::writer::LeaderboardWriter;

use context::InvocationContext;

/// How a shard ended within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardOutcome {
    /// Open shard read to the tip, or closed shard drained.
    Complete,
    /// Closed shard applied but not drained; children must wait.
    Incomplete,
}

/// Wires the collaborators together and runs invocations.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn StreamSource>,
    checkpoints: Arc<dyn CheckpointRepository>,
    samples: Arc<dyn SampleRepository>,
    aggregates: Arc<dyn AggregateRepository>,
    metrics: Arc<PipelineMetrics>,
    seed: Option<u64>,
    invocations: AtomicU64,
}

impl Pipeline {
    /// Create a pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Read-side queries over the same tables this pipeline writes.
    pub fn query(&self) -> LeaderboardQuery {
        LeaderboardQuery::new(
            self.samples.clone(),
            self.aggregates.clone(),
            self.config.retry.clone(),
        )
    }

    /// Run one invocation over every shard of the stream.
    ///
    /// Returns `Err` only for invocation-wide failures (the shard list could
    /// not be read or the lineage is malformed). Per-shard failures are
    /// reported in the summary.
    pub async fn run_invocation(&self) -> Result<InvocationSummary> {
        let stream_id = self.config.stream_id.as_str();
        let mut ctx = InvocationContext::new(stream_id, self.config.invocation_budget);
        info!(stream = stream_id, "invocation started");

        let source = self.source.as_ref();
        let descriptors = with_retry(&self.config.retry, "describe_shards", move || {
            source.describe_shards(stream_id)
        })
        .await?;

        let mut topology = TopologyResolver::new(descriptors).map_err(|err| {
            error!(stream = stream_id, "invalid shard lineage, aborting: {}", err);
            PipelineError::from(err)
        })?;
        debug!(stream = stream_id, shards = topology.len(), "topology resolved");

        let positions = self.load_checkpoints(&mut topology, &mut ctx).await?;

        let reader = ShardReader::new(self.source.clone(), &self.config);
        let mut writer = LeaderboardWriter::new(self.sample_store());

        loop {
            if ctx.deadline_reached() {
                warn!(stream = stream_id, "invocation budget spent, not starting more shards");
                ctx.summary.deadline_reached = true;
                break;
            }
            let Some(shard) = topology.next_shard().cloned() else {
                break;
            };
            let checkpoint = positions.get(&shard.shard_id).and_then(Option::as_ref);

            match self
                .process_shard(&reader, &mut writer, &mut ctx, &shard, checkpoint)
                .await
            {
                Ok(ShardOutcome::Complete) => {
                    topology.mark_processed(&shard.shard_id)?;
                    ctx.record_processed(&shard.shard_id);
                }
                Ok(ShardOutcome::Incomplete) => {
                    warn!(
                        shard_id = %shard.shard_id,
                        "closed shard not drained within the page-fetch budget"
                    );
                    topology.hold(&shard.shard_id)?;
                    ctx.record_incomplete(&shard.shard_id);
                }
                Err(err) => {
                    warn!(shard_id = %shard.shard_id, "shard failed, checkpoint not advanced: {}", err);
                    writer.reset();
                    topology.hold(&shard.shard_id)?;
                    ctx.record_failure(&shard.shard_id, &err);
                }
            }
        }

        let waiting: Vec<ShardId> = topology
            .shards()
            .filter(|shard| !topology.is_processed(&shard.shard_id))
            .filter(|shard| !ctx.has_outcome(&shard.shard_id))
            .map(|shard| shard.shard_id.clone())
            .collect();
        let summary = ctx.finish(waiting);
        self.metrics.record_invocation(&summary);

        info!(
            stream = stream_id,
            processed = summary.shards_processed.len(),
            failed = summary.shards_failed.len(),
            records = summary.records_read,
            admissions = summary.admissions,
            evictions = summary.evictions,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "invocation finished"
        );
        Ok(summary)
    }

    /// Reads every shard checkpoint once. Closed shards already drained are
    /// marked processed so their children are free to go.
    async fn load_checkpoints(
        &self,
        topology: &mut TopologyResolver,
        ctx: &mut InvocationContext,
    ) -> Result<HashMap<ShardId, Option<SequenceNumber>>> {
        let shards: Vec<ShardDescriptor> = topology.shards().cloned().collect();
        let mut positions = HashMap::with_capacity(shards.len());
        let checkpoints = self.checkpoints.as_ref();

        for shard in shards {
            let shard_id = shard.shard_id.as_str();
            let loaded = with_retry(&self.config.retry, "checkpoint get", move || {
                checkpoints.get(shard_id)
            })
            .await;

            match loaded {
                Ok(position) => {
                    if shard.is_drained_by(position.as_ref()) {
                        topology.mark_processed(shard_id)?;
                        ctx.summary.shards_skipped += 1;
                    }
                    positions.insert(shard.shard_id.clone(), position);
                }
                Err(err) => {
                    warn!(shard_id, "checkpoint unreadable, holding shard: {}", err);
                    topology.hold(shard_id)?;
                    ctx.record_failure(shard_id, &err);
                }
            }
        }
        Ok(positions)
    }

    async fn process_shard(
        &self,
        reader: &ShardReader,
        writer: &mut LeaderboardWriter,
        ctx: &mut InvocationContext,
        shard: &ShardDescriptor,
        checkpoint: Option<&SequenceNumber>,
    ) -> Result<ShardOutcome> {
        let shard_id = shard.shard_id.as_str();
        let batch = reader.read(shard, checkpoint).await?;
        ctx.record_batch(&batch);

        let reduction = reduce(&batch.events);
        for anomaly in &reduction.anomalies {
            log_anomaly(anomaly);
        }
        ctx.record_reduction(&reduction);

        let applied = writer.applied_through(shard_id, &reduction.records).await?;
        let overlap = applied.as_ref().map_or(0, |mark| {
            batch
                .events
                .partition_point(|event| event.sequence_number <= *mark)
        });
        match applied {
            Some(mark) if overlap > 0 => {
                let (counted, fresh) = batch.events.split_at(overlap);
                debug!(
                    shard_id,
                    applied = %mark,
                    overlap,
                    "batch overlaps events already counted"
                );
                apply_reduction(writer, ctx, shard_id, &reduce(counted), Some(&mark)).await?;
                apply_reduction(writer, ctx, shard_id, &reduce(fresh), None).await?;
            }
            _ => apply_reduction(writer, ctx, shard_id, &reduction, None).await?,
        }

        if let Some(position) = batch.resume_position {
            let checkpoint = ShardCheckpoint::new(shard_id, position);
            let store = self.checkpoints.as_ref();
            let checkpoint_ref = &checkpoint;
            let advanced = with_retry(&self.config.retry, "checkpoint put", move || {
                store.put(checkpoint_ref)
            })
            .await?;
            debug!(
                shard_id,
                position = %checkpoint.last_sequence_number,
                advanced,
                "checkpoint written"
            );
        }

        info!(
            shard_id,
            events = batch.events.len(),
            records = reduction.records.len(),
            "shard applied"
        );

        if shard.is_closed() && !batch.reached_end {
            Ok(ShardOutcome::Incomplete)
        } else {
            Ok(ShardOutcome::Complete)
        }
    }

    fn sample_store(&self) -> SampleStore {
        let rng = match self.seed {
            Some(seed) => {
                let invocation = self.invocations.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(invocation))
            }
            None => StdRng::from_entropy(),
        };
        SampleStore::new(
            self.samples.clone(),
            self.aggregates.clone(),
            self.config.default_max_sample_size,
            self.config.retry.clone(),
            rng,
        )
    }
}

/// Applies one reduction. `through` overrides the batch end recorded as the
/// applied mark.
async fn apply_reduction(
    writer: &mut LeaderboardWriter,
    ctx: &mut InvocationContext,
    shard_id: &str,
    reduction: &Reduction,
    through: Option<&SequenceNumber>,
) -> Result<()> {
    let Some(through) = through.or(reduction.last_sequence.as_ref()) else {
        return Ok(());
    };
    if reduction.records.is_empty() {
        return Ok(());
    }
    let report = writer.apply(shard_id, through, &reduction.records).await?;
    ctx.record_apply(&report);
    Ok(())
}

fn log_anomaly(anomaly: &Anomaly) {
    match anomaly {
        Anomaly::AmbiguousMutation {
            shard_id,
            sequence_number,
            user,
            stats,
        } => warn!(
            shard_id = %shard_id,
            sequence = %sequence_number,
            user = %user,
            "skipping event that changes several stats at once: {:?}",
            stats
        ),
        Anomaly::UserDeleted {
            shard_id,
            sequence_number,
            user,
        } => warn!(
            shard_id = %shard_id,
            sequence = %sequence_number,
            user = %user,
            "user item removed; sampled entries of this user stay in place"
        ),
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Arc<dyn StreamSource>>,
    checkpoints: Option<Arc<dyn CheckpointRepository>>,
    samples: Option<Arc<dyn SampleRepository>>,
    aggregates: Option<Arc<dyn AggregateRepository>>,
    metrics: Option<Arc<PipelineMetrics>>,
    seed: Option<u64>,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            source: None,
            checkpoints: None,
            samples: None,
            aggregates: None,
            metrics: None,
            seed: None,
        }
    }

    /// Override pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the change stream (required)
    pub fn source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the checkpoint table (required)
    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointRepository>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Set the sample table (required)
    pub fn samples(mut self, samples: Arc<dyn SampleRepository>) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Set the aggregate table (required)
    pub fn aggregates(mut self, aggregates: Arc<dyn AggregateRepository>) -> Self {
        self.aggregates = Some(aggregates);
        self
    }

    /// Share a metrics tracker with other pipelines (optional)
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Seed admission and eviction randomness for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        Ok(Pipeline {
            source: self
                .source
                .ok_or(PipelineError::MissingCollaborator("stream source"))?,
            checkpoints: self
                .checkpoints
                .ok_or(PipelineError::MissingCollaborator("checkpoint repository"))?,
            samples: self
                .samples
                .ok_or(PipelineError::MissingCollaborator("sample repository"))?,
            aggregates: self
                .aggregates
                .ok_or(PipelineError::MissingCollaborator("aggregate repository"))?,
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
            seed: self.seed,
            invocations: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCheckpointRepository;
    use crate::stream::InMemoryStream;

    #[test]
    fn test_build_requires_every_table() {
        let err = Pipeline::builder()
            .source(Arc::new(InMemoryStream::new("player-stats")))
            .checkpoints(Arc::new(InMemoryCheckpointRepository::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::MissingCollaborator("sample repository")
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = Pipeline::builder()
            .config(PipelineConfig::default().with_page_limit(0))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
