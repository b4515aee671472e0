//! Abbreviated write intents produced by the reducer.

use crate::types::{StatName, StatValue, UserId};

/// What the leaderboard writer should do for one (user, stat).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordKind {
    /// The stat appeared for the user: an admission decision.
    New,
    /// The stat value changed.
    Update,
    /// The stat was removed from the user.
    Delete,
    /// The whole user item was removed. Carries no stat.
    UserDeleted,
}

/// Consolidation key: a user-wide marker uses `None` as its stat.
pub type RecordKey = (UserId, Option<StatName>);

/// Minimal per-(user, stat) intent left after reducing a batch.
///
/// Besides the resolved `kind`, the record remembers what happened to the key
/// earlier in the same batch so the writer can keep population counts exact.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbbreviatedRecord {
    pub user: UserId,
    pub stat: Option<StatName>,
    pub value: Option<StatValue>,
    pub kind: RecordKind,
    /// The first intent folded for this key was a `New`.
    pub created_in_batch: bool,
    /// A delete (of the stat or the whole user) preceded the final intent.
    pub deleted_in_batch: bool,
}

impl AbbreviatedRecord {
    pub fn new_stat(user: impl Into<UserId>, stat: impl Into<StatName>, value: StatValue) -> Self {
        Self {
            user: user.into(),
            stat: Some(stat.into()),
            value: Some(value),
            kind: RecordKind::New,
            created_in_batch: true,
            deleted_in_batch: false,
        }
    }

    pub fn update(user: impl Into<UserId>, stat: impl Into<StatName>, value: StatValue) -> Self {
        Self {
            user: user.into(),
            stat: Some(stat.into()),
            value: Some(value),
            kind: RecordKind::Update,
            created_in_batch: false,
            deleted_in_batch: false,
        }
    }

    pub fn delete(user: impl Into<UserId>, stat: impl Into<StatName>) -> Self {
        Self {
            user: user.into(),
            stat: Some(stat.into()),
            value: None,
            kind: RecordKind::Delete,
            created_in_batch: false,
            deleted_in_batch: true,
        }
    }

    pub fn user_deleted(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            stat: None,
            value: None,
            kind: RecordKind::UserDeleted,
            created_in_batch: false,
            deleted_in_batch: true,
        }
    }

    pub fn key(&self) -> RecordKey {
        (self.user.clone(), self.stat.clone())
    }
}
