//! Bounded per-stat sample with probabilistic admission and random eviction.
//!
//! [`SampleStore`] caches the sample and aggregate of every stat it touches
//! for the lifetime of one invocation. Mutations are staged in memory and
//! reach the backing tables only through [`SampleStore::flush`] and
//! [`SampleStore::flush_evictions`], each one batched write.

mod store;

pub use store::{FlushReport, SampleStore};
