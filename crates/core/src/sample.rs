//! Sample entries, per-stat aggregates and admission arithmetic.

use std::collections::BTreeMap;

use crate::event::SequenceNumber;
use crate::types::{ShardId, StatName, StatValue, UserId};

/// Durable unit of the bounded sample, keyed by (stat, user).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleEntry {
    pub stat: StatName,
    pub user: UserId,
    pub value: StatValue,
}

impl SampleEntry {
    pub fn new(stat: impl Into<StatName>, user: impl Into<UserId>, value: StatValue) -> Self {
        Self {
            stat: stat.into(),
            user: user.into(),
            value,
        }
    }
}

/// Best recorded value for a stat and who holds it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HighScore {
    pub user: UserId,
    pub value: StatValue,
}

impl HighScore {
    pub fn new(user: impl Into<UserId>, value: StatValue) -> Self {
        Self {
            user: user.into(),
            value,
        }
    }

    /// Returns true if `value` would replace this score (ties keep the incumbent).
    pub fn is_beaten_by(&self, value: StatValue) -> bool {
        value > self.value
    }
}

/// Population and high-score bookkeeping for one stat.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatAggregate {
    pub stat: StatName,
    pub population: u64,
    pub max_sample_size: u64,
    pub high_score: Option<HighScore>,
    /// Last sequence per shard whose batch is already counted here.
    ///
    /// Written together with the population it guards, after the batch's
    /// sample writes, so a batch at or below this mark is fully durable.
    #[cfg_attr(feature = "serde", serde(default))]
    pub applied: BTreeMap<ShardId, SequenceNumber>,
}

impl StatAggregate {
    pub fn new(stat: impl Into<StatName>, max_sample_size: u64) -> Self {
        Self {
            stat: stat.into(),
            population: 0,
            max_sample_size,
            high_score: None,
            applied: BTreeMap::new(),
        }
    }

    pub fn applied_through(&self, shard_id: &str) -> Option<&SequenceNumber> {
        self.applied.get(shard_id)
    }

    /// Whether the batch of `shard_id` ending at `sequence` is already counted.
    pub fn has_applied(&self, shard_id: &str, sequence: &SequenceNumber) -> bool {
        self.applied_through(shard_id)
            .is_some_and(|applied| applied >= sequence)
    }

    /// Moves the shard's mark forward. Returns whether it moved.
    pub fn mark_applied(&mut self, shard_id: &str, sequence: &SequenceNumber) -> bool {
        if self.has_applied(shard_id, sequence) {
            return false;
        }
        self.applied.insert(shard_id.to_string(), sequence.clone());
        true
    }

    /// Applies a signed population delta, saturating at zero.
    pub fn apply_population_delta(&mut self, delta: i64) {
        self.population = if delta >= 0 {
            self.population.saturating_add(delta.unsigned_abs())
        } else {
            self.population.saturating_sub(delta.unsigned_abs())
        };
    }

    /// Replaces the high score if `candidate` is strictly greater.
    ///
    /// Returns whether the aggregate changed.
    pub fn offer_high_score(&mut self, candidate: &HighScore) -> bool {
        let replace = self
            .high_score
            .as_ref()
            .is_none_or(|current| current.is_beaten_by(candidate.value));
        if replace {
            self.high_score = Some(candidate.clone());
        }
        replace
    }
}

/// Probability that a new member is admitted to the sample.
///
/// Admission is certain while the sample (including admissions already staged
/// in this batch) has room. Past that point the reservoir inclusion
/// probability `max / (population + pending_new)` is used, with the
/// population estimate taken once per batch rather than per item.
pub fn admission_probability(
    current_sample_size: u64,
    pending_admits: u64,
    max_sample_size: u64,
    population: u64,
    pending_new: u64,
) -> f64 {
    if current_sample_size.saturating_add(pending_admits) < max_sample_size {
        return 1.0;
    }
    let denominator = population.saturating_add(pending_new);
    if denominator == 0 {
        return 0.0;
    }
    (max_sample_size as f64 / denominator as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_is_certain_below_capacity() {
        assert_eq!(admission_probability(0, 0, 5, 0, 1), 1.0);
        assert_eq!(admission_probability(3, 1, 5, 4, 2), 1.0);
    }

    #[test]
    fn test_admission_uses_reservoir_ratio_when_full() {
        let p = admission_probability(100, 0, 100, 1000, 1);
        assert!((p - 100.0 / 1001.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_capacity_never_admits() {
        assert_eq!(admission_probability(0, 0, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_population_delta_saturates() {
        let mut aggregate = StatAggregate::new("wins", 10);
        aggregate.apply_population_delta(3);
        aggregate.apply_population_delta(-5);
        assert_eq!(aggregate.population, 0);
    }

    #[test]
    fn test_high_score_requires_strictly_greater() {
        let mut aggregate = StatAggregate::new("wins", 10);
        assert!(aggregate.offer_high_score(&HighScore::new("a", 10.0)));
        assert!(!aggregate.offer_high_score(&HighScore::new("b", 10.0)));
        assert!(aggregate.offer_high_score(&HighScore::new("b", 11.0)));
        assert_eq!(aggregate.high_score, Some(HighScore::new("b", 11.0)));
    }

    #[test]
    fn test_applied_mark_only_moves_forward() {
        let mut aggregate = StatAggregate::new("wins", 10);
        assert!(!aggregate.has_applied("s", &SequenceNumber::from(5u64)));

        assert!(aggregate.mark_applied("s", &SequenceNumber::from(12u64)));
        assert!(!aggregate.mark_applied("s", &SequenceNumber::from(9u64)));
        assert!(aggregate.has_applied("s", &SequenceNumber::from(9u64)));
        assert!(aggregate.has_applied("s", &SequenceNumber::from(12u64)));
        assert!(!aggregate.has_applied("s", &SequenceNumber::from(13u64)));
        assert!(!aggregate.has_applied("other", &SequenceNumber::from(1u64)));
    }
}
