//! Read-side queries over the sampled leaderboard.

use std::cmp::Ordering;
use std::sync::Arc;

use leaderboard_core::{HighScore, SampleEntry, StatAggregate, StatValue};

use crate::api::Result;
use crate::config::RetryPolicy;
use crate::repository::{AggregateRepository, SampleRepository};
use crate::retry::with_retry;

/// Rank of a value estimated from the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankEstimate {
    /// 1-based position; 1 is the best.
    pub rank: u64,
    /// Share of the population at or below the value, in 0-100.
    pub percentile: f64,
    pub population: u64,
    pub sample_size: u64,
}

/// Approximate leaderboard answers from the sample and aggregate tables.
pub struct LeaderboardQuery {
    samples: Arc<dyn SampleRepository>,
    aggregates: Arc<dyn AggregateRepository>,
    retry: RetryPolicy,
}

impl LeaderboardQuery {
    pub fn new(
        samples: Arc<dyn SampleRepository>,
        aggregates: Arc<dyn AggregateRepository>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            samples,
            aggregates,
            retry,
        }
    }

    async fn aggregate(&self, stat: &str) -> Result<Option<StatAggregate>> {
        let aggregates = self.aggregates.as_ref();
        with_retry(&self.retry, "aggregate get", move || aggregates.get(stat)).await
    }

    async fn entries(&self, stat: &str) -> Result<Vec<SampleEntry>> {
        let samples = self.samples.as_ref();
        with_retry(&self.retry, "sample query", move || samples.query_stat(stat)).await
    }

    /// Estimates where `value` would rank among the whole population.
    ///
    /// Every sampled entry strictly greater than `value` stands for
    /// `population / sample_size` members. Returns `None` when the stat has no
    /// aggregate or an empty sample.
    pub async fn approximate_rank(&self, stat: &str, value: StatValue) -> Result<Option<RankEstimate>> {
        let Some(aggregate) = self.aggregate(stat).await? else {
            return Ok(None);
        };
        let entries = self.entries(stat).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let sample_size = entries.len() as u64;
        let above = entries.iter().filter(|entry| entry.value > value).count() as u64;
        let scale = aggregate.population.max(sample_size) as f64 / sample_size as f64;
        let estimated_above = (above as f64 * scale).round() as u64;

        let population = aggregate.population.max(sample_size);
        let rank = (1 + estimated_above).min(population);
        let percentile = 100.0 * (1.0 - above as f64 / sample_size as f64);

        Ok(Some(RankEstimate {
            rank,
            percentile,
            population,
            sample_size,
        }))
    }

    /// Top `limit` sampled entries, best first. Ties order by user.
    pub async fn sample_leaders(&self, stat: &str, limit: usize) -> Result<Vec<SampleEntry>> {
        let mut entries = self.entries(stat).await?;
        entries.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.user.cmp(&b.user))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn high_score(&self, stat: &str) -> Result<Option<HighScore>> {
        Ok(self
            .aggregate(stat)
            .await?
            .and_then(|aggregate| aggregate.high_score))
    }

    pub async fn population(&self, stat: &str) -> Result<u64> {
        Ok(self
            .aggregate(stat)
            .await?
            .map_or(0, |aggregate| aggregate.population))
    }
}
