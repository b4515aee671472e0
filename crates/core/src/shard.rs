//! Shard descriptors and resume checkpoints.

use crate::event::SequenceNumber;
use crate::types::ShardId;

/// One shard of a change stream as reported by the topology source.
///
/// Rebuilt on every invocation; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShardDescriptor {
    pub shard_id: ShardId,
    pub parent_shard_id: Option<ShardId>,
    pub starting_sequence: SequenceNumber,
    /// Present once the shard is closed (resharded or retired).
    pub ending_sequence: Option<SequenceNumber>,
}

impl ShardDescriptor {
    pub fn open(shard_id: impl Into<ShardId>, starting_sequence: impl Into<SequenceNumber>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            starting_sequence: starting_sequence.into(),
            ending_sequence: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<ShardId>) -> Self {
        self.parent_shard_id = Some(parent.into());
        self
    }

    pub fn closed_at(mut self, ending_sequence: impl Into<SequenceNumber>) -> Self {
        self.ending_sequence = Some(ending_sequence.into());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.ending_sequence.is_some()
    }

    /// A closed shard whose checkpoint reached its ending sequence has nothing left.
    pub fn is_drained_by(&self, checkpoint: Option<&SequenceNumber>) -> bool {
        match (&self.ending_sequence, checkpoint) {
            (Some(end), Some(position)) => position >= end,
            _ => false,
        }
    }
}

/// Last durably applied position within a shard.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShardCheckpoint {
    pub shard_id: ShardId,
    pub last_sequence_number: SequenceNumber,
}

impl ShardCheckpoint {
    pub fn new(shard_id: impl Into<ShardId>, last_sequence_number: impl Into<SequenceNumber>) -> Self {
        Self {
            shard_id: shard_id.into(),
            last_sequence_number: last_sequence_number.into(),
        }
    }

    /// Moves the checkpoint forward. Never moves it backwards.
    ///
    /// Returns whether the position changed.
    pub fn advance(&mut self, sequence: &SequenceNumber) -> bool {
        if *sequence > self.last_sequence_number {
            self.last_sequence_number = sequence.clone();
            true
        } else {
            false
        }
    }
}
