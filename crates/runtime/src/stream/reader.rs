//! Pages one shard between its resume position and its end (or the tip).

use std::sync::Arc;

use leaderboard_core::{ChangeEvent, SequenceNumber, ShardDescriptor, ShardId};
use tracing::debug;

use super::source::{IteratorPosition, StreamSource};
use crate::api::Result;
use crate::config::{PipelineConfig, RetryPolicy};
use crate::retry::with_retry;

/// Records read from one shard in one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardBatch {
    pub shard_id: ShardId,
    /// New events in shard order, strictly after the resume checkpoint.
    pub events: Vec<ChangeEvent>,
    pub pages_fetched: u64,
    /// Empty pages fetched before any data arrived.
    pub empty_retries: u64,
    /// True once a closed shard has been read through its ending sequence.
    pub reached_end: bool,
    /// Position to checkpoint after the batch is applied, if it moved.
    pub resume_position: Option<SequenceNumber>,
}

impl ShardBatch {
    fn new(shard_id: &str) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            ..Self::default()
        }
    }
}

/// Shard reader bound to one stream.
///
/// A closed shard is paged until a record at its ending sequence shows up or
/// the source reports no further pages; only runs of consecutive empty pages
/// count against the fetch budget. An open shard gets at most
/// `page_fetch_budget` fetches and returns whatever arrived, stopping early
/// at the first empty page after data (the tip).
pub struct ShardReader {
    source: Arc<dyn StreamSource>,
    stream_id: String,
    page_limit: usize,
    page_fetch_budget: u32,
    retry: RetryPolicy,
}

impl ShardReader {
    pub fn new(source: Arc<dyn StreamSource>, config: &PipelineConfig) -> Self {
        Self {
            source,
            stream_id: config.stream_id.clone(),
            page_limit: config.page_limit,
            page_fetch_budget: config.page_fetch_budget,
            retry: config.retry.clone(),
        }
    }

    pub async fn read(
        &self,
        shard: &ShardDescriptor,
        checkpoint: Option<&SequenceNumber>,
    ) -> Result<ShardBatch> {
        let mut batch = ShardBatch::new(&shard.shard_id);
        let ending = shard.ending_sequence.as_ref();

        let position = match checkpoint {
            Some(sequence) => IteratorPosition::AfterSequence(sequence.clone()),
            None => IteratorPosition::AtSequence(shard.starting_sequence.clone()),
        };

        let source = self.source.as_ref();
        let stream_id = self.stream_id.as_str();
        let shard_id = shard.shard_id.as_str();
        let limit = self.page_limit;

        let opened = with_retry(&self.retry, "open_iterator", move || {
            source.open_iterator(stream_id, shard_id, position.clone())
        })
        .await?;

        let mut token = Some(opened);
        let mut fetches: u32 = 0;
        let mut consecutive_empty: u32 = 0;

        while let Some(current) = token.take() {
            let exhausted = match ending {
                Some(_) => consecutive_empty >= self.page_fetch_budget,
                None => fetches >= self.page_fetch_budget,
            };
            if exhausted {
                debug!(
                    shard_id,
                    fetches, "page-fetch budget spent after {} events",
                    batch.events.len()
                );
                break;
            }

            let current = &current;
            let page = with_retry(&self.retry, "get_page", move || {
                source.get_page(current, limit)
            })
            .await?;
            fetches += 1;
            batch.pages_fetched += 1;

            if page.records.is_empty() {
                consecutive_empty += 1;
                if batch.events.is_empty() {
                    batch.empty_retries += 1;
                } else if ending.is_none() {
                    // Open shard with nothing newer: we are at the tip.
                    break;
                }
            } else {
                consecutive_empty = 0;
            }

            let mut saw_end = false;
            for record in page.records {
                if let Some(resume) = checkpoint
                    && record.sequence_number <= *resume
                {
                    continue;
                }
                if let Some(end) = ending {
                    if record.sequence_number > *end {
                        saw_end = true;
                        continue;
                    }
                    if record.sequence_number == *end {
                        saw_end = true;
                    }
                }
                batch.events.push(record);
            }

            if saw_end {
                batch.reached_end = true;
                break;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => batch.reached_end = ending.is_some(),
            }
        }

        batch.resume_position = if batch.reached_end {
            ending.cloned()
        } else {
            batch
                .events
                .iter()
                .map(|event| &event.sequence_number)
                .max()
                .cloned()
        };
        if let (Some(previous), Some(next)) = (checkpoint, batch.resume_position.as_ref())
            && next <= previous
        {
            batch.resume_position = None;
        }

        debug!(
            shard_id,
            pages = batch.pages_fetched,
            events = batch.events.len(),
            reached_end = batch.reached_end,
            "shard read finished"
        );
        Ok(batch)
    }
}
