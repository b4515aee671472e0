//! Change-stream access: the source contract and the shard reader.
//!
//! - [`source`] defines the collaborator contract (topology + paging)
//! - [`reader`] drains closed shards and tip-reads open ones
//! - [`memory`] provides an in-process stream for tests and local runs

mod memory;
mod reader;
mod source;

pub use memory::InMemoryStream;
pub use reader::{ShardBatch, ShardReader};
pub use source::{IteratorPosition, IteratorToken, Page, StreamError, StreamSource};
