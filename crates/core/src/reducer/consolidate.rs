//! Batch-level folding of per-event intents into one record per key.

use std::collections::{HashMap, HashSet};

use crate::record::{AbbreviatedRecord, RecordKey, RecordKind};
use crate::types::UserId;

/// Accumulates intents in event order, keeping one record per (user, stat).
#[derive(Debug, Default)]
pub(crate) struct Consolidator {
    order: Vec<RecordKey>,
    records: HashMap<RecordKey, AbbreviatedRecord>,
    deleted_users: HashSet<UserId>,
}

impl Consolidator {
    pub(crate) fn fold(&mut self, incoming: AbbreviatedRecord) {
        if incoming.kind == RecordKind::UserDeleted {
            // A user-wide delete wipes every pending intent of that user.
            self.records.retain(|(user, _), _| user != &incoming.user);
            self.deleted_users.insert(incoming.user.clone());
            self.insert(incoming);
            return;
        }

        let key = incoming.key();
        match self.records.get_mut(&key) {
            Some(existing) => merge_into(existing, incoming),
            None => {
                let mut record = incoming;
                if self.deleted_users.contains(&record.user) {
                    record.deleted_in_batch = true;
                }
                self.insert(record);
            }
        }
    }

    /// Surviving records, in first-seen order.
    pub(crate) fn finish(mut self) -> Vec<AbbreviatedRecord> {
        let mut out = Vec::with_capacity(self.records.len());
        for key in self.order {
            if let Some(record) = self.records.remove(&key) {
                out.push(record);
            }
        }
        out
    }

    fn insert(&mut self, record: AbbreviatedRecord) {
        let key = record.key();
        self.order.push(key.clone());
        self.records.insert(key, record);
    }
}

/// Later intents override the value; `Delete` and `New` statuses are sticky.
fn merge_into(existing: &mut AbbreviatedRecord, incoming: AbbreviatedRecord) {
    match incoming.kind {
        RecordKind::Delete | RecordKind::UserDeleted => {
            existing.kind = RecordKind::Delete;
            existing.value = None;
            existing.deleted_in_batch = true;
        }
        RecordKind::New | RecordKind::Update => match existing.kind {
            // Still scheduled for removal even though the stat came back.
            RecordKind::Delete | RecordKind::UserDeleted => {}
            RecordKind::New => existing.value = incoming.value,
            RecordKind::Update => {
                existing.kind = incoming.kind;
                existing.value = incoming.value;
            }
        },
    }
}
