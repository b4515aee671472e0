//! Shard lineage ordering.
//!
//! Resharding splits or merges shards; children carry a pointer to their
//! parent. Records for one key may live in a parent and then in a child, so a
//! child must never be read while an ancestor that is still present in the
//! stream remains unprocessed.
//!
//! # Algorithm
//!
//! For a pending shard, walk `parent_shard_id` upward while the ancestor is
//! present in the descriptor set and not yet processed. The walk ends at the
//! oldest unprocessed ancestor, which is the next shard to read. A shard whose
//! parent is absent (expired or consumed in an earlier run) is a root.
//!
//! A shard that is held back (failed, or a closed shard that could not be
//! drained) blocks its whole subtree for the rest of the invocation.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::shard::ShardDescriptor;
use crate::types::ShardId;

/// Malformed lineage. Always fatal for the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("shard {0} is listed more than once")]
    DuplicateShard(ShardId),

    #[error("shard descriptor has an empty shard id")]
    EmptyShardId,

    #[error("shard {0} names itself as parent")]
    SelfParent(ShardId),

    #[error("shard lineage contains a cycle through {0}")]
    Cycle(ShardId),

    #[error("shard {0} is not part of the topology")]
    UnknownShard(ShardId),
}

/// Yields shards of one stream in causal order.
#[derive(Debug, Clone)]
pub struct TopologyResolver {
    shards: BTreeMap<ShardId, ShardDescriptor>,
    processed: HashSet<ShardId>,
    held: HashSet<ShardId>,
}

impl TopologyResolver {
    /// Validates the lineage graph and builds a resolver.
    pub fn new(descriptors: Vec<ShardDescriptor>) -> Result<Self, TopologyError> {
        let mut shards = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.shard_id.is_empty() {
                return Err(TopologyError::EmptyShardId);
            }
            if descriptor.parent_shard_id.as_deref() == Some(descriptor.shard_id.as_str()) {
                return Err(TopologyError::SelfParent(descriptor.shard_id));
            }
            if shards.contains_key(&descriptor.shard_id) {
                return Err(TopologyError::DuplicateShard(descriptor.shard_id));
            }
            shards.insert(descriptor.shard_id.clone(), descriptor);
        }

        let resolver = Self {
            shards,
            processed: HashSet::new(),
            held: HashSet::new(),
        };
        resolver.check_acyclic()?;
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn get(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        self.shards.get(shard_id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &ShardDescriptor> {
        self.shards.values()
    }

    pub fn is_processed(&self, shard_id: &str) -> bool {
        self.processed.contains(shard_id)
    }

    /// Marks a shard complete, unblocking its children.
    pub fn mark_processed(&mut self, shard_id: &str) -> Result<(), TopologyError> {
        if !self.shards.contains_key(shard_id) {
            return Err(TopologyError::UnknownShard(shard_id.to_string()));
        }
        self.processed.insert(shard_id.to_string());
        Ok(())
    }

    /// Holds a shard back; it and its descendants are not offered again.
    pub fn hold(&mut self, shard_id: &str) -> Result<(), TopologyError> {
        if !self.shards.contains_key(shard_id) {
            return Err(TopologyError::UnknownShard(shard_id.to_string()));
        }
        self.held.insert(shard_id.to_string());
        Ok(())
    }

    /// Next shard safe to read, or `None` when nothing readable remains.
    pub fn next_shard(&self) -> Option<&ShardDescriptor> {
        self.shards
            .keys()
            .filter(|id| !self.processed.contains(*id))
            .find_map(|id| self.oldest_unprocessed_ancestor(id))
            .and_then(|id| self.shards.get(id))
    }

    /// Unprocessed shards that are held back or sit below a held shard.
    pub fn blocked(&self) -> Vec<ShardId> {
        self.shards
            .keys()
            .filter(|id| !self.processed.contains(*id))
            .filter(|id| self.oldest_unprocessed_ancestor(id).is_none())
            .cloned()
            .collect()
    }

    /// Full traversal order assuming every shard succeeds.
    pub fn traversal_order(&self) -> Vec<ShardId> {
        let mut simulation = self.clone();
        let mut order = Vec::with_capacity(self.shards.len());
        while let Some(next) = simulation.next_shard() {
            let id = next.shard_id.clone();
            simulation.processed.insert(id.clone());
            order.push(id);
        }
        order
    }

    /// Walks upward from `shard_id`. Returns `None` if a held shard is hit.
    fn oldest_unprocessed_ancestor<'a>(&'a self, shard_id: &'a str) -> Option<&'a str> {
        let mut current = shard_id;
        loop {
            if self.held.contains(current) {
                return None;
            }
            let parent = self
                .shards
                .get(current)
                .and_then(|shard| shard.parent_shard_id.as_deref())
                .filter(|parent| self.shards.contains_key(*parent))
                .filter(|parent| !self.processed.contains(*parent));
            match parent {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
    }

    fn check_acyclic(&self) -> Result<(), TopologyError> {
        let mut cleared: HashSet<&str> = HashSet::new();
        for start in self.shards.keys() {
            let mut path: HashSet<&str> = HashSet::new();
            let mut current = start.as_str();
            loop {
                if cleared.contains(current) {
                    break;
                }
                if !path.insert(current) {
                    return Err(TopologyError::Cycle(current.to_string()));
                }
                match self
                    .shards
                    .get(current)
                    .and_then(|shard| shard.parent_shard_id.as_deref())
                    .filter(|parent| self.shards.contains_key(*parent))
                {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
            cleared.extend(path);
        }
        Ok(())
    }
}
