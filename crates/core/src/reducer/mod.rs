//! Record reducer: raw change events → minimal per-(user, stat) intents.
//!
//! Reduction is a pure, single-threaded fold over one shard batch:
//! 1. Each event is diffed into at most one intent ([`diff`])
//! 2. Intents are folded per key in event order ([`consolidate`])
//!
//! Data-quality anomalies never abort reduction. They are returned alongside
//! the records so the caller can report them.

mod consolidate;
mod diff;

use crate::event::{ChangeEvent, SequenceNumber};
use crate::record::AbbreviatedRecord;
use crate::types::{ShardId, StatName, UserId};

use consolidate::Consolidator;
use diff::{EventIntent, diff_event};

/// Data-quality observation made while reducing a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anomaly {
    /// An event changed several fields at once and was skipped.
    AmbiguousMutation {
        shard_id: ShardId,
        sequence_number: SequenceNumber,
        user: UserId,
        stats: Vec<StatName>,
    },
    /// A whole user item was removed; per-stat sample entries are not cleaned up.
    UserDeleted {
        shard_id: ShardId,
        sequence_number: SequenceNumber,
        user: UserId,
    },
}

/// Result of reducing one batch of events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reduction {
    /// One record per surviving (user, stat) key.
    pub records: Vec<AbbreviatedRecord>,
    pub anomalies: Vec<Anomaly>,
    /// Number of events consumed.
    pub events_seen: usize,
    /// Highest sequence number in the batch (checkpoint candidate).
    pub last_sequence: Option<SequenceNumber>,
}

/// Reduces a shard batch. Events must be in shard order.
pub fn reduce(events: &[ChangeEvent]) -> Reduction {
    let mut consolidator = Consolidator::default();
    let mut anomalies = Vec::new();
    let mut last_sequence: Option<SequenceNumber> = None;

    for event in events {
        if last_sequence
            .as_ref()
            .is_none_or(|last| event.sequence_number > *last)
        {
            last_sequence = Some(event.sequence_number.clone());
        }

        match diff_event(event) {
            EventIntent::Single(record) => {
                if record.stat.is_none() {
                    anomalies.push(Anomaly::UserDeleted {
                        shard_id: event.shard_id.clone(),
                        sequence_number: event.sequence_number.clone(),
                        user: event.user.clone(),
                    });
                }
                consolidator.fold(record);
            }
            EventIntent::Unchanged => {}
            EventIntent::Ambiguous(stats) => anomalies.push(Anomaly::AmbiguousMutation {
                shard_id: event.shard_id.clone(),
                sequence_number: event.sequence_number.clone(),
                user: event.user.clone(),
                stats,
            }),
        }
    }

    Reduction {
        records: consolidator.finish(),
        anomalies,
        events_seen: events.len(),
        last_sequence,
    }
}
