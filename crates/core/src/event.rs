//! Change-capture events emitted by the statistics table stream.
//!
//! A [`ChangeEvent`] is immutable once produced by the stream. Sequence numbers
//! are only ordered within a single shard; comparing numbers across shards is
//! meaningless and nothing in the pipeline does it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ShardId, StatName, StatValue, UserId};

/// Field snapshot carried by a change event (stat name → value).
pub type FieldImage = BTreeMap<StatName, StatValue>;

/// Position of a record within its shard.
///
/// Streams hand out sequence numbers as arbitrarily long decimal strings, so
/// the value is kept as text and compared numerically: shorter numbers sort
/// first, equal-length numbers compare lexically. Leading zeros are stripped
/// on construction so equality agrees with ordering.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "String", into = "String")
)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(value: impl Into<String>) -> Self {
        let raw: String = value.into();
        let trimmed = raw.trim_start_matches('0');
        if trimmed.is_empty() {
            Self("0".to_string())
        } else if trimmed.len() == raw.len() {
            Self(raw)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the value contains only ASCII digits.
    pub fn is_numeric(&self) -> bool {
        self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SequenceNumber {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SequenceNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<SequenceNumber> for String {
    fn from(value: SequenceNumber) -> Self {
        value.0
    }
}

/// Kind of mutation a change event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventType {
    Insert,
    Update,
    /// The whole user item was removed from the source table.
    Remove,
}

/// One insert/update/remove notification with before/after field images.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeEvent {
    pub shard_id: ShardId,
    pub sequence_number: SequenceNumber,
    pub event_type: EventType,
    pub user: UserId,
    pub before: Option<FieldImage>,
    pub after: Option<FieldImage>,
}

impl ChangeEvent {
    /// Create an INSERT event carrying only an after image.
    pub fn insert(
        shard_id: impl Into<ShardId>,
        sequence_number: impl Into<SequenceNumber>,
        user: impl Into<UserId>,
        after: FieldImage,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: sequence_number.into(),
            event_type: EventType::Insert,
            user: user.into(),
            before: None,
            after: Some(after),
        }
    }

    /// Create an UPDATE event carrying both images.
    pub fn update(
        shard_id: impl Into<ShardId>,
        sequence_number: impl Into<SequenceNumber>,
        user: impl Into<UserId>,
        before: FieldImage,
        after: FieldImage,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: sequence_number.into(),
            event_type: EventType::Update,
            user: user.into(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// Create a REMOVE event for a whole user item.
    pub fn remove(
        shard_id: impl Into<ShardId>,
        sequence_number: impl Into<SequenceNumber>,
        user: impl Into<UserId>,
        before: Option<FieldImage>,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: sequence_number.into(),
            event_type: EventType::Remove,
            user: user.into(),
            before,
            after: None,
        }
    }
}
