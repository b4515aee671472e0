//! Before/after image diff for a single change event.

use crate::event::{ChangeEvent, EventType, FieldImage};
use crate::record::AbbreviatedRecord;
use crate::types::StatName;

/// Outcome of diffing one event.
#[derive(Debug, PartialEq)]
pub(crate) enum EventIntent {
    /// Exactly one field changed (or the whole user was removed).
    Single(AbbreviatedRecord),
    /// Images are identical on every field.
    Unchanged,
    /// More than one field changed; no field is treated as authoritative.
    Ambiguous(Vec<StatName>),
}

/// Diffs the field sets of an event's images.
///
/// - field only in `after` → `New`
/// - field in both with a different value → `Update`
/// - field only in `before` → `Delete`
///
/// The rules are counted together: two qualifying fields of any kind make the
/// event ambiguous.
pub(crate) fn diff_event(event: &ChangeEvent) -> EventIntent {
    if event.event_type == EventType::Remove {
        return EventIntent::Single(AbbreviatedRecord::user_deleted(&event.user));
    }

    let empty = FieldImage::new();
    let before = event.before.as_ref().unwrap_or(&empty);
    let after = event.after.as_ref().unwrap_or(&empty);

    let mut changed = Vec::new();
    for (stat, value) in after {
        match before.get(stat) {
            None => changed.push(AbbreviatedRecord::new_stat(&event.user, stat, *value)),
            Some(previous) if previous != value => {
                changed.push(AbbreviatedRecord::update(&event.user, stat, *value))
            }
            Some(_) => {}
        }
    }
    for stat in before.keys() {
        if !after.contains_key(stat) {
            changed.push(AbbreviatedRecord::delete(&event.user, stat));
        }
    }

    match changed.len() {
        0 => EventIntent::Unchanged,
        1 => match changed.pop() {
            Some(record) => EventIntent::Single(record),
            None => EventIntent::Unchanged,
        },
        _ => EventIntent::Ambiguous(changed.into_iter().filter_map(|r| r.stat).collect()),
    }
}
