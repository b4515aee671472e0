//! In-memory change stream for tests and local runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use leaderboard_core::{ChangeEvent, SequenceNumber, ShardDescriptor, ShardId};

use super::source::{IteratorPosition, IteratorToken, Page, StreamError, StreamSource};

/// Records and descriptor of one shard.
#[derive(Debug)]
struct ShardLog {
    descriptor: ShardDescriptor,
    records: Vec<ChangeEvent>,
}

/// Position of an open iterator.
#[derive(Debug, Clone)]
struct Cursor {
    shard_id: ShardId,
    index: usize,
    lag_remaining: u32,
}

#[derive(Debug, Default)]
struct StreamState {
    /// At most one live cursor per shard: opening an iterator supersedes the
    /// shard's older tokens.
    shards: BTreeMap<ShardId, ShardLog>,
    cursors: HashMap<String, Cursor>,
    next_token: u64,
    page_failures: VecDeque<StreamError>,
    reposition_lag: u32,
    pages_served: u64,
}

/// Thread-safe stream held entirely in memory.
///
/// Supports resharding (parent links, closing shards), failure injection on
/// page fetches, and a reposition lag that makes the first pages after
/// `open_iterator` come back empty, as a freshly positioned iterator can on a
/// real stream while writes propagate.
#[derive(Debug)]
pub struct InMemoryStream {
    stream_id: String,
    state: Mutex<StreamState>,
}

impl InMemoryStream {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            state: Mutex::new(StreamState::default()),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Register a shard. Records are appended separately.
    pub fn add_shard(&self, descriptor: ShardDescriptor) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        state.shards.insert(
            descriptor.shard_id.clone(),
            ShardLog {
                descriptor,
                records: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append an event to its shard. Sequence numbers must increase.
    pub fn append(&self, event: ChangeEvent) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        let shard = state
            .shards
            .get_mut(&event.shard_id)
            .ok_or_else(|| StreamError::ShardNotFound(event.shard_id.clone()))?;
        if shard.descriptor.is_closed() {
            return Err(StreamError::Internal(format!(
                "shard {} is closed",
                event.shard_id
            )));
        }
        if let Some(last) = shard.records.last()
            && last.sequence_number >= event.sequence_number
        {
            return Err(StreamError::Internal(format!(
                "sequence {} does not follow {} in shard {}",
                event.sequence_number, last.sequence_number, event.shard_id
            )));
        }
        shard.records.push(event);
        Ok(())
    }

    /// Close a shard at its last record (or its starting position if empty).
    pub fn close_shard(&self, shard_id: &str) -> Result<SequenceNumber, StreamError> {
        let mut state = self.lock()?;
        let shard = state
            .shards
            .get_mut(shard_id)
            .ok_or_else(|| StreamError::ShardNotFound(shard_id.to_string()))?;
        let ending = shard
            .records
            .last()
            .map(|record| record.sequence_number.clone())
            .unwrap_or_else(|| shard.descriptor.starting_sequence.clone());
        shard.descriptor.ending_sequence = Some(ending.clone());
        Ok(ending)
    }

    /// Drop a shard, as retention expiry would.
    pub fn expire_shard(&self, shard_id: &str) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        state
            .shards
            .remove(shard_id)
            .ok_or_else(|| StreamError::ShardNotFound(shard_id.to_string()))?;
        state.cursors.retain(|_, cursor| cursor.shard_id != shard_id);
        Ok(())
    }

    /// Queue errors returned by the next page fetches, in order.
    pub fn fail_next_pages(&self, errors: impl IntoIterator<Item = StreamError>) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        state.page_failures.extend(errors);
        Ok(())
    }

    /// Number of empty pages served after each `open_iterator`.
    pub fn set_reposition_lag(&self, pages: u32) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        state.reposition_lag = pages;
        Ok(())
    }

    /// Iterator tokens still redeemable.
    pub fn open_cursors(&self) -> usize {
        self.state.lock().map(|state| state.cursors.len()).unwrap_or(0)
    }

    /// Total successful `get_page` calls.
    pub fn pages_served(&self) -> u64 {
        self.state.lock().map(|state| state.pages_served).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StreamState>, StreamError> {
        self.state
            .lock()
            .map_err(|_| StreamError::Internal("stream state lock poisoned".into()))
    }
}

#[async_trait]
impl StreamSource for InMemoryStream {
    async fn describe_shards(&self, stream_id: &str) -> Result<Vec<ShardDescriptor>, StreamError> {
        if stream_id != self.stream_id {
            return Err(StreamError::StreamNotFound(stream_id.to_string()));
        }
        let state = self.lock()?;
        Ok(state
            .shards
            .values()
            .map(|shard| shard.descriptor.clone())
            .collect())
    }

    async fn open_iterator(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: IteratorPosition,
    ) -> Result<IteratorToken, StreamError> {
        if stream_id != self.stream_id {
            return Err(StreamError::StreamNotFound(stream_id.to_string()));
        }
        let mut state = self.lock()?;
        let shard = state
            .shards
            .get(shard_id)
            .ok_or_else(|| StreamError::ShardNotFound(shard_id.to_string()))?;

        let index = match &position {
            IteratorPosition::TrimHorizon => 0,
            IteratorPosition::AtSequence(sequence) => shard
                .records
                .partition_point(|record| record.sequence_number < *sequence),
            IteratorPosition::AfterSequence(sequence) => shard
                .records
                .partition_point(|record| record.sequence_number <= *sequence),
        };

        state.cursors.retain(|_, cursor| cursor.shard_id != shard_id);
        let cursor = Cursor {
            shard_id: shard_id.to_string(),
            index,
            lag_remaining: state.reposition_lag,
        };
        state.next_token += 1;
        let token = format!("{}:{}", shard_id, state.next_token);
        state.cursors.insert(token.clone(), cursor);
        Ok(IteratorToken(token))
    }

    async fn get_page(&self, token: &IteratorToken, limit: usize) -> Result<Page, StreamError> {
        let mut state = self.lock()?;
        if let Some(error) = state.page_failures.pop_front() {
            return Err(error);
        }

        let mut cursor = state
            .cursors
            .remove(&token.0)
            .ok_or(StreamError::ExpiredIterator)?;
        let shard = state
            .shards
            .get(&cursor.shard_id)
            .ok_or_else(|| StreamError::ShardNotFound(cursor.shard_id.clone()))?;

        let records = if cursor.lag_remaining > 0 {
            cursor.lag_remaining -= 1;
            Vec::new()
        } else {
            let end = (cursor.index + limit).min(shard.records.len());
            let page = shard.records[cursor.index..end].to_vec();
            cursor.index = end;
            page
        };

        let exhausted = shard.descriptor.is_closed()
            && cursor.lag_remaining == 0
            && cursor.index >= shard.records.len();

        state.pages_served += 1;
        let next_token = if exhausted {
            None
        } else {
            state.next_token += 1;
            let next = format!("{}:{}", cursor.shard_id, state.next_token);
            state.cursors.insert(next.clone(), cursor);
            Some(IteratorToken(next))
        };

        Ok(Page {
            records,
            next_token,
        })
    }
}
