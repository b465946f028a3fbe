//! The id → record-offset map
//!
//! Sharded 256 ways by entity-id hash. Rewrites redirect an id to its new
//! frame; superseded offsets are simply no longer referenced (the frames
//! stay readable for point-in-time content until compaction drops them).

use entitydb_core::limits::SHARD_COUNT;
use entitydb_core::EntityId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Sharded map from entity id to the offset of its live record frame
#[derive(Debug)]
pub struct OffsetMap {
    shards: Vec<RwLock<FxHashMap<EntityId, u64>>>,
}

impl OffsetMap {
    /// Create an empty map
    pub fn new() -> Self {
        OffsetMap {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(FxHashMap::default()))
                .collect(),
        }
    }

    fn shard(&self, id: &EntityId) -> &RwLock<FxHashMap<EntityId, u64>> {
        &self.shards[id.shard(SHARD_COUNT)]
    }

    /// Look up the live offset of an entity
    pub fn get(&self, id: &EntityId) -> Option<u64> {
        self.shard(id).read().get(id).copied()
    }

    /// True if the id is known
    pub fn contains(&self, id: &EntityId) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// Insert or redirect an id to a new offset
    pub fn insert(&self, id: EntityId, offset: u64) {
        self.shard(&id).write().insert(id, offset);
    }

    /// Forget an id (used only by compaction swap)
    pub fn remove(&self, id: &EntityId) -> Option<u64> {
        self.shard(id).write().remove(id)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// True when no entities exist
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Snapshot all `(id, offset)` pairs, shard by shard
    pub fn snapshot(&self) -> Vec<(EntityId, u64)> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            for (id, off) in shard.read().iter() {
                out.push((id.clone(), *off));
            }
        }
        out
    }

    /// Replace the entire contents (compaction swap)
    pub fn replace_all(&self, entries: Vec<(EntityId, u64)>) {
        for shard in &self.shards {
            shard.write().clear();
        }
        for (id, off) in entries {
            self.insert(id, off);
        }
    }
}

impl Default for OffsetMap {
    fn default() -> Self {
        Self::new()
    }
}
