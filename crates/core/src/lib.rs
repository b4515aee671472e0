//! Deterministic building blocks of the leaderboard sampling pipeline.
//!
//! `leaderboard-core` defines the canonical data model (change events, shard
//! lineage, abbreviated records, sample entries and aggregates) and exposes
//! pure APIs that the runtime drives against real storage. Nothing in this
//! crate performs I/O or draws random numbers; the runtime injects both.
//!
//! Modules are organized by responsibility:
//! - [`event`] models raw change-capture notifications
//! - [`reducer`] folds a shard batch into minimal per-(user, stat) intents
//! - [`topology`] orders shards so parents are read before children
//! - [`sample`] holds sample entries, aggregates and admission arithmetic
pub mod event;
pub mod record;
pub mod reducer;
pub mod sample;
pub mod shard;
pub mod topology;
pub mod types;

pub use event::{ChangeEvent, EventType, FieldImage, SequenceNumber};
pub use record::{AbbreviatedRecord, RecordKey, RecordKind};
pub use reducer::{Anomaly, Reduction, reduce};
pub use sample::{HighScore, SampleEntry, StatAggregate, admission_probability};
pub use shard::{ShardCheckpoint, ShardDescriptor};
pub use topology::{TopologyError, TopologyResolver};
pub use types::{ShardId, StatName, StatValue, UserId};
