//! Asynchronous abstraction over a change-capture stream.
//!
//! Production deployments wrap the managed stream API; tests use
//! [`super::InMemoryStream`].

use async_trait::async_trait;
use leaderboard_core::{ChangeEvent, SequenceNumber, ShardDescriptor, ShardId};
use thiserror::Error;

/// Errors surfaced by a stream source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream {0} not found")]
    StreamNotFound(String),

    #[error("shard {0} not found")]
    ShardNotFound(ShardId),

    #[error("iterator token expired or unknown")]
    ExpiredIterator,

    #[error("stream request throttled")]
    Throttled,

    #[error("stream service unavailable: {0}")]
    Unavailable(String),

    #[error("stream source internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Returns true if the request may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable(_))
    }
}

/// Where a new shard iterator starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorPosition {
    /// Oldest record still retained by the shard.
    TrimHorizon,
    /// At the given record, inclusive.
    AtSequence(SequenceNumber),
    /// Just past the given record.
    AfterSequence(SequenceNumber),
}

/// Opaque paging cursor handed out by the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IteratorToken(pub String);

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<ChangeEvent>,
    /// `None` once a closed shard has no records left.
    pub next_token: Option<IteratorToken>,
}

/// Trait for reading shard topology and pages from a change stream.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Describe every shard currently retained by the stream.
    async fn describe_shards(&self, stream_id: &str) -> Result<Vec<ShardDescriptor>, StreamError>;

    /// Position a new iterator within a shard.
    async fn open_iterator(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: IteratorPosition,
    ) -> Result<IteratorToken, StreamError>;

    /// Fetch up to `limit` records starting at the iterator.
    async fn get_page(&self, token: &IteratorToken, limit: usize) -> Result<Page, StreamError>;
}
