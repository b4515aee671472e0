//! Applies reduced records to the sample store.
//!
//! Records are dispatched one by one against the cached sample, while
//! population deltas and high-score candidates are staged per stat. At the
//! end of the batch each touched stat gets a single aggregate write carrying
//! the batch's applied mark, the sample writes go out as one batch before
//! it, and touched stats are trimmed back to capacity with a second batched
//! write.
//!
//! A stat whose aggregate already carries the batch's mark has seen the
//! whole batch durably, so its records are skipped on re-application.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use leaderboard_core::{AbbreviatedRecord, HighScore, RecordKind, SequenceNumber, StatName};
use tracing::debug;

use crate::api::Result;
use crate::sample::SampleStore;

/// Per-stat bookkeeping accumulated while dispatching one batch.
#[derive(Debug, Default)]
struct StatStaging {
    /// The aggregate already counts this batch.
    applied: bool,
    population_delta: i64,
    pending_new: u64,
    candidate: Option<HighScore>,
}

impl StatStaging {
    fn offer(&mut self, user: &str, value: f64) {
        if self
            .candidate
            .as_ref()
            .is_none_or(|current| current.is_beaten_by(value))
        {
            self.candidate = Some(HighScore::new(user, value));
        }
    }
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub records: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub updates: u64,
    /// NEW records for users already sampled, applied as updates.
    pub replays: u64,
    pub removals: u64,
    pub evictions: u64,
    pub user_deletions: u64,
    /// Records of stats that had already counted this batch.
    pub already_applied: u64,
    pub stats_touched: u64,
}

/// Drives admission, updates and removals for reduced batches.
pub struct LeaderboardWriter {
    store: SampleStore,
}

impl LeaderboardWriter {
    pub fn new(store: SampleStore) -> Self {
        Self { store }
    }

    /// Forget cached state after a failed batch.
    pub fn reset(&mut self) {
        self.store.reset();
    }

    /// Highest applied mark of `shard_id` among the stats `records` touch.
    pub async fn applied_through(
        &mut self,
        shard_id: &str,
        records: &[AbbreviatedRecord],
    ) -> Result<Option<SequenceNumber>> {
        let mut highest: Option<SequenceNumber> = None;
        for stat in records.iter().filter_map(|record| record.stat.as_deref()) {
            if let Some(mark) = self.store.applied_through(stat, shard_id).await?
                && highest.as_ref().is_none_or(|current| mark > *current)
            {
                highest = Some(mark);
            }
        }
        Ok(highest)
    }

    /// Apply one reduced batch of `shard_id` ending at `through` and flush it
    /// durably.
    ///
    /// Returns only after both batched sample writes and the aggregate write
    /// have succeeded, so the caller may checkpoint afterwards.
    pub async fn apply(
        &mut self,
        shard_id: &str,
        through: &SequenceNumber,
        records: &[AbbreviatedRecord],
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            records: records.len() as u64,
            ..ApplyReport::default()
        };
        let mut staging: BTreeMap<StatName, StatStaging> = BTreeMap::new();

        for record in records {
            let stat = match (&record.kind, &record.stat) {
                (RecordKind::UserDeleted, _) => {
                    debug!(user = %record.user, "user-wide delete left without per-stat cleanup");
                    report.user_deletions += 1;
                    continue;
                }
                (_, Some(stat)) => stat,
                (_, None) => continue,
            };
            let stage = match staging.entry(stat.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let applied = self
                        .store
                        .applied_through(stat, shard_id)
                        .await?
                        .is_some_and(|mark| mark >= *through);
                    if applied {
                        debug!(shard_id, stat = %stat, through = %through, "stat already counts batch");
                    }
                    entry.insert(StatStaging {
                        applied,
                        ..StatStaging::default()
                    })
                }
            };
            if stage.applied {
                report.already_applied += 1;
                continue;
            }

            match record.kind {
                RecordKind::Update => {
                    let Some(value) = record.value else { continue };
                    self.stage_candidate(stage, stat, &record.user, value).await?;
                    if self.store.update(stat, &record.user, value).await? {
                        report.updates += 1;
                    }
                }
                RecordKind::New => {
                    let Some(value) = record.value else { continue };
                    self.stage_candidate(stage, stat, &record.user, value).await?;
                    stage.population_delta += 1;

                    // Left behind by a batch whose aggregate write never landed.
                    if !record.deleted_in_batch && self.store.contains(stat, &record.user).await? {
                        self.store.update(stat, &record.user, value).await?;
                        report.replays += 1;
                        continue;
                    }

                    stage.pending_new += 1;
                    let admitted = self
                        .store
                        .admit(stat, &record.user, value, stage.pending_new)
                        .await?;
                    if admitted {
                        report.admissions += 1;
                    } else {
                        report.rejections += 1;
                        if record.deleted_in_batch
                            && self.store.remove_if_present(stat, &record.user).await?
                        {
                            report.removals += 1;
                        }
                    }
                }
                RecordKind::Delete => {
                    if self.store.remove_if_present(stat, &record.user).await? {
                        report.removals += 1;
                    }
                    if !record.created_in_batch {
                        stage.population_delta -= 1;
                    }
                }
                RecordKind::UserDeleted => {}
            }
        }

        report.stats_touched = staging.len() as u64;
        for (stat, stage) in staging.iter().filter(|(_, stage)| !stage.applied) {
            self.store
                .commit_aggregate(
                    stat,
                    shard_id,
                    through,
                    stage.population_delta,
                    stage.candidate.as_ref(),
                )
                .await?;
        }
        let flushed = self.store.flush().await?;

        // Already-counted stats are trimmed too, in case only the eviction
        // write was lost.
        for stat in staging.keys() {
            report.evictions += self.store.evict_excess(stat).await? as u64;
        }
        self.store.flush_evictions().await?;

        debug!(
            shard_id,
            records = report.records,
            admissions = report.admissions,
            evictions = report.evictions,
            skipped = report.already_applied,
            puts = flushed.puts,
            deletes = flushed.deletes,
            "batch applied"
        );
        Ok(report)
    }

    async fn stage_candidate(
        &mut self,
        stage: &mut StatStaging,
        stat: &str,
        user: &str,
        value: f64,
    ) -> Result<()> {
        let beats_recorded = self
            .store
            .top_score(stat)
            .await?
            .is_none_or(|current| current.is_beaten_by(value));
        if beats_recorded {
            stage.offer(user, value);
        }
        Ok(())
    }
}
