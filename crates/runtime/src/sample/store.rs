use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use leaderboard_core::{
    HighScore, SampleEntry, SequenceNumber, StatAggregate, StatName, StatValue, UserId,
    admission_probability,
};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::api::Result;
use crate::config::RetryPolicy;
use crate::repository::{AggregateRepository, SampleRepository};
use crate::retry::with_retry;

/// Cached state of one stat plus the writes staged against it.
#[derive(Debug)]
struct StatView {
    /// Live sample: committed entries with staged admissions and removals applied.
    entries: HashMap<UserId, StatValue>,
    aggregate: StatAggregate,
    aggregate_dirty: bool,
    puts: BTreeMap<UserId, StatValue>,
    deletes: BTreeSet<UserId>,
    pending_admits: u64,
    evictions: BTreeSet<UserId>,
}

impl StatView {
    fn new(entries: Vec<SampleEntry>, aggregate: StatAggregate) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.user, entry.value))
                .collect(),
            aggregate,
            aggregate_dirty: false,
            puts: BTreeMap::new(),
            deletes: BTreeSet::new(),
            pending_admits: 0,
            evictions: BTreeSet::new(),
        }
    }
}

/// Counts written by one [`SampleStore::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub puts: usize,
    pub deletes: usize,
    pub aggregates: usize,
}

/// Per-invocation view over the sample and aggregate tables.
pub struct SampleStore {
    samples: Arc<dyn SampleRepository>,
    aggregates: Arc<dyn AggregateRepository>,
    default_max_sample_size: u64,
    retry: RetryPolicy,
    rng: StdRng,
    stats: BTreeMap<StatName, StatView>,
}

impl SampleStore {
    pub fn new(
        samples: Arc<dyn SampleRepository>,
        aggregates: Arc<dyn AggregateRepository>,
        default_max_sample_size: u64,
        retry: RetryPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            samples,
            aggregates,
            default_max_sample_size,
            retry,
            rng,
            stats: BTreeMap::new(),
        }
    }

    /// Loads a stat on first use. A stat with no aggregate starts empty with
    /// the default capacity.
    async fn view(&mut self, stat: &str) -> Result<&mut StatView> {
        match self.stats.entry(stat.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let samples = self.samples.as_ref();
                let aggregates = self.aggregates.as_ref();
                let sampled = with_retry(&self.retry, "sample query", move || {
                    samples.query_stat(stat)
                })
                .await?;
                let aggregate = with_retry(&self.retry, "aggregate get", move || {
                    aggregates.get(stat)
                })
                .await?
                .unwrap_or_else(|| StatAggregate::new(stat, self.default_max_sample_size));

                debug!(
                    stat,
                    sample_size = sampled.len(),
                    population = aggregate.population,
                    "loaded stat"
                );
                Ok(entry.insert(StatView::new(sampled, aggregate)))
            }
        }
    }

    /// Decides whether a new member enters the sample and stages the put.
    ///
    /// `pending_new` is the number of new members of this stat seen so far in
    /// the batch, this one included.
    pub async fn admit(
        &mut self,
        stat: &str,
        user: &str,
        value: StatValue,
        pending_new: u64,
    ) -> Result<bool> {
        let view = self.view(stat).await?;
        let live = view.entries.len() as u64;
        let probability = admission_probability(
            live.saturating_sub(view.pending_admits),
            view.pending_admits,
            view.aggregate.max_sample_size,
            view.aggregate.population,
            pending_new,
        );

        if !self.rng.gen_bool(probability) {
            return Ok(false);
        }

        // `view` borrows `self` mutably; look it up again after using the rng.
        let view = self.view(stat).await?;
        view.entries.insert(user.to_string(), value);
        view.puts.insert(user.to_string(), value);
        view.deletes.remove(user);
        view.pending_admits += 1;
        Ok(true)
    }

    /// Overwrites a sampled value. Unsampled users are ignored.
    pub async fn update(&mut self, stat: &str, user: &str, value: StatValue) -> Result<bool> {
        let view = self.view(stat).await?;
        match view.entries.get_mut(user) {
            Some(current) => {
                *current = value;
                view.puts.insert(user.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes a sampled entry. Returns whether the sample shrank.
    pub async fn remove_if_present(&mut self, stat: &str, user: &str) -> Result<bool> {
        let view = self.view(stat).await?;
        if view.entries.remove(user).is_none() {
            return Ok(false);
        }
        if view.puts.remove(user).is_some() && view.pending_admits > 0 {
            view.pending_admits -= 1;
        }
        view.deletes.insert(user.to_string());
        Ok(true)
    }

    pub async fn contains(&mut self, stat: &str, user: &str) -> Result<bool> {
        Ok(self.view(stat).await?.entries.contains_key(user))
    }

    pub async fn sample_size(&mut self, stat: &str) -> Result<usize> {
        Ok(self.view(stat).await?.entries.len())
    }

    /// Current high score, from the cached aggregate.
    pub async fn top_score(&mut self, stat: &str) -> Result<Option<HighScore>> {
        Ok(self.view(stat).await?.aggregate.high_score.clone())
    }

    /// Last sequence of `shard_id` already counted in the stat's aggregate.
    pub async fn applied_through(
        &mut self,
        stat: &str,
        shard_id: &str,
    ) -> Result<Option<SequenceNumber>> {
        Ok(self
            .view(stat)
            .await?
            .aggregate
            .applied_through(shard_id)
            .cloned())
    }

    /// Stages one aggregate update for the batch of `shard_id` ending at
    /// `through`: the applied mark, the net population delta and the best
    /// high-score candidate, kept only if strictly greater.
    pub async fn commit_aggregate(
        &mut self,
        stat: &str,
        shard_id: &str,
        through: &SequenceNumber,
        population_delta: i64,
        candidate: Option<&HighScore>,
    ) -> Result<()> {
        let view = self.view(stat).await?;
        let mut changed = view.aggregate.mark_applied(shard_id, through);
        changed |= population_delta != 0;
        view.aggregate.apply_population_delta(population_delta);
        if let Some(candidate) = candidate {
            changed |= view.aggregate.offer_high_score(candidate);
        }
        view.aggregate_dirty |= changed;
        Ok(())
    }

    /// Writes staged sample puts/deletes as one batch, then dirty aggregates.
    ///
    /// The order matters: an aggregate carrying a batch's applied mark is
    /// only written once that batch's sample writes are durable.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        let mut aggregates = Vec::new();
        for (stat, view) in &self.stats {
            puts.extend(
                view.puts
                    .iter()
                    .map(|(user, value)| SampleEntry::new(stat.clone(), user.clone(), *value)),
            );
            deletes.extend(view.deletes.iter().map(|user| (stat.clone(), user.clone())));
            if view.aggregate_dirty {
                aggregates.push(view.aggregate.clone());
            }
        }

        if !puts.is_empty() || !deletes.is_empty() {
            let samples = self.samples.as_ref();
            let (puts, deletes) = (&puts, &deletes);
            with_retry(&self.retry, "sample batch write", move || {
                samples.batch_write(puts, deletes)
            })
            .await?;
        }
        if !aggregates.is_empty() {
            let store = self.aggregates.as_ref();
            let aggregates = &aggregates;
            with_retry(&self.retry, "aggregate batch put", move || {
                store.batch_put(aggregates)
            })
            .await?;
        }

        for view in self.stats.values_mut() {
            view.puts.clear();
            view.deletes.clear();
            view.pending_admits = 0;
            view.aggregate_dirty = false;
        }

        Ok(FlushReport {
            puts: puts.len(),
            deletes: deletes.len(),
            aggregates: aggregates.len(),
        })
    }

    /// Picks uniformly random surplus entries until the stat fits its
    /// capacity. The deletes are staged for [`Self::flush_evictions`].
    pub async fn evict_excess(&mut self, stat: &str) -> Result<usize> {
        let view = self.view(stat).await?;
        let max = usize::try_from(view.aggregate.max_sample_size).unwrap_or(usize::MAX);
        let size = view.entries.len();
        if size <= max {
            return Ok(0);
        }

        // Sorted first so a seeded rng picks the same victims every run.
        let mut users: Vec<UserId> = view.entries.keys().cloned().collect();
        users.sort();
        let surplus = size - max;

        let (victims, _) = users.partial_shuffle(&mut self.rng, surplus);
        let victims = victims.to_vec();

        let view = self.view(stat).await?;
        for user in &victims {
            view.entries.remove(user);
            view.evictions.insert(user.clone());
        }
        debug!(stat, evicted = victims.len(), "evicted surplus sample entries");
        Ok(victims.len())
    }

    /// Writes staged evictions of every stat as one batch.
    pub async fn flush_evictions(&mut self) -> Result<usize> {
        let deletes: Vec<(StatName, UserId)> = self
            .stats
            .iter()
            .flat_map(|(stat, view)| {
                view.evictions
                    .iter()
                    .map(move |user| (stat.clone(), user.clone()))
            })
            .collect();
        if deletes.is_empty() {
            return Ok(0);
        }

        let samples = self.samples.as_ref();
        let deletes_ref = &deletes;
        with_retry(&self.retry, "sample eviction write", move || {
            samples.batch_write(&[], deletes_ref)
        })
        .await?;

        for view in self.stats.values_mut() {
            view.evictions.clear();
        }
        Ok(deletes.len())
    }

    /// Drops every cached stat, discarding staged writes.
    ///
    /// Used after a failed batch so the next shard reloads durable state.
    pub fn reset(&mut self) {
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;

    use super::*;
    use crate::repository::{InMemoryAggregateRepository, InMemorySampleRepository};

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(1),
        }
    }

    fn store(
        samples: Arc<InMemorySampleRepository>,
        aggregates: Arc<InMemoryAggregateRepository>,
        seed: u64,
    ) -> SampleStore {
        SampleStore::new(samples, aggregates, 5, retry(), StdRng::seed_from_u64(seed))
    }

    #[tokio::test]
    async fn test_admission_below_capacity_is_certain() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples.clone(), aggregates.clone(), 1);

        for i in 0..5 {
            assert!(store.admit("wins", &format!("u{}", i), 1.0, i + 1).await.unwrap());
        }
        store
            .commit_aggregate("wins", "shard-0", &SequenceNumber::from(5u64), 5, None)
            .await
            .unwrap();
        let report = store.flush().await.unwrap();

        assert_eq!(report.puts, 5);
        assert_eq!(samples.sample_size("wins").unwrap(), 5);
        assert_eq!(aggregates.get("wins").await.unwrap().unwrap().population, 5);
    }

    #[tokio::test]
    async fn test_update_ignores_unsampled_users() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples.clone(), aggregates, 1);

        assert!(!store.update("wins", "ghost", 3.0).await.unwrap());
        assert!(store.admit("wins", "u1", 1.0, 1).await.unwrap());
        assert!(store.update("wins", "u1", 4.0).await.unwrap());
        store.flush().await.unwrap();

        let entries = samples.query_stat("wins").await.unwrap();
        assert_eq!(entries, vec![SampleEntry::new("wins", "u1", 4.0)]);
    }

    #[tokio::test]
    async fn test_remove_cancels_staged_admission() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples.clone(), aggregates, 1);

        assert!(store.admit("wins", "u1", 1.0, 1).await.unwrap());
        assert!(store.remove_if_present("wins", "u1").await.unwrap());
        assert!(!store.remove_if_present("wins", "u1").await.unwrap());
        let report = store.flush().await.unwrap();

        assert_eq!(report.puts, 0);
        assert_eq!(samples.sample_size("wins").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evict_excess_restores_bound() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let entries: Vec<_> = (0..9)
            .map(|i| SampleEntry::new("wins", format!("u{}", i), i as f64))
            .collect();
        samples.batch_write(&entries, &[]).await.unwrap();
        let aggregates = Arc::new(InMemoryAggregateRepository::with_aggregates([
            StatAggregate::new("wins", 4),
        ]));
        let mut store = store(samples.clone(), aggregates, 7);

        assert_eq!(store.evict_excess("wins").await.unwrap(), 5);
        assert_eq!(store.sample_size("wins").await.unwrap(), 4);
        assert_eq!(store.flush_evictions().await.unwrap(), 5);
        assert_eq!(samples.sample_size("wins").unwrap(), 4);
        assert_eq!(store.evict_excess("wins").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_high_score_ties_keep_incumbent() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples, aggregates.clone(), 1);

        let through = SequenceNumber::from(1u64);
        store
            .commit_aggregate("wins", "shard-0", &through, 0, Some(&HighScore::new("a", 10.0)))
            .await
            .unwrap();
        store
            .commit_aggregate("wins", "shard-0", &through, 0, Some(&HighScore::new("b", 10.0)))
            .await
            .unwrap();
        store.flush().await.unwrap();

        let stored = aggregates.get("wins").await.unwrap().unwrap();
        assert_eq!(stored.high_score, Some(HighScore::new("a", 10.0)));
        assert_eq!(
            store.top_score("wins").await.unwrap(),
            Some(HighScore::new("a", 10.0))
        );
    }

    #[tokio::test]
    async fn test_aggregate_write_follows_sample_write() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples.clone(), aggregates.clone(), 1);
        let through = SequenceNumber::from(8u64);

        assert!(store.admit("wins", "u1", 1.0, 1).await.unwrap());
        store
            .commit_aggregate("wins", "shard-0", &through, 1, None)
            .await
            .unwrap();
        samples.fail_next_writes(2);
        assert!(store.flush().await.is_err());
        // Nothing claims the batch while its sample write is missing.
        assert!(aggregates.get("wins").await.unwrap().is_none());

        store.reset();
        assert_eq!(store.applied_through("wins", "shard-0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_applied_mark_is_written_with_aggregate() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples, aggregates.clone(), 1);
        let through = SequenceNumber::from(8u64);

        // A batch that leaves population alone still records its mark.
        store
            .commit_aggregate("wins", "shard-0", &through, 0, None)
            .await
            .unwrap();
        assert_eq!(store.flush().await.unwrap().aggregates, 1);

        let stored = aggregates.get("wins").await.unwrap().unwrap();
        assert!(stored.has_applied("shard-0", &through));
        assert_eq!(
            store.applied_through("wins", "shard-0").await.unwrap(),
            Some(through)
        );
    }

    #[tokio::test]
    async fn test_reset_discards_staged_writes() {
        let samples = Arc::new(InMemorySampleRepository::new());
        let aggregates = Arc::new(InMemoryAggregateRepository::new());
        let mut store = store(samples.clone(), aggregates, 1);

        store.admit("wins", "u1", 1.0, 1).await.unwrap();
        store.reset();
        store.flush().await.unwrap();
        assert!(!store.contains("wins", "u1").await.unwrap());
        assert_eq!(samples.batch_write_count(), 0);
    }
}
