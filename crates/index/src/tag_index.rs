//! The sharded tag index
//!
//! 256 shards keyed by `hash(tag-id) mod 256`. Each shard maps tag-id →
//! sorted packed array of entity ids. Writes land in a per-shard append
//! buffer that the background scheduler merges every 250 ms or once the
//! buffer exceeds 4096 entries; reads see a merged view of postings plus
//! buffer. A per-shard bloom filter answers negative membership cheaply
//! and short-circuits empty intersections.
//!
//! The index is derived state: on cold start it is rebuilt from the
//! record section.

use crate::bloom::BloomFilter;
use entitydb_core::limits::SHARD_COUNT;
use entitydb_core::{EntityId, TagId};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};

/// Buffer size that forces an inline merge
pub const MERGE_BUFFER_CAP: usize = 4096;

/// How often the background scheduler merges buffers (milliseconds)
pub const MERGE_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferedOp {
    Add,
    Remove,
}

#[derive(Debug)]
struct TagShard {
    postings: FxHashMap<TagId, Vec<EntityId>>,
    buffer: Vec<(TagId, EntityId, BufferedOp)>,
    bloom: BloomFilter,
}

impl TagShard {
    fn new() -> Self {
        TagShard {
            postings: FxHashMap::default(),
            buffer: Vec::new(),
            bloom: BloomFilter::with_capacity(1024),
        }
    }

    fn merge(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        for (tag, id, op) in self.buffer.drain(..) {
            let list = self.postings.entry(tag).or_default();
            match op {
                BufferedOp::Add => {
                    if let Err(pos) = list.binary_search(&id) {
                        list.insert(pos, id);
                    }
                }
                BufferedOp::Remove => {
                    if let Ok(pos) = list.binary_search(&id) {
                        list.remove(pos);
                    }
                }
            }
        }
        self.postings.retain(|_, list| !list.is_empty());

        // Removals leave stale bits; rebuild from the merged postings
        self.bloom.clear();
        for (tag, list) in &self.postings {
            for id in list {
                self.bloom.insert(pair_hash(*tag, id));
            }
        }
    }

    fn merged_ids(&self, tag: TagId) -> Vec<EntityId> {
        let mut ids = self.postings.get(&tag).cloned().unwrap_or_default();
        for (t, id, op) in &self.buffer {
            if *t != tag {
                continue;
            }
            match op {
                BufferedOp::Add => {
                    if let Err(pos) = ids.binary_search(id) {
                        ids.insert(pos, id.clone());
                    }
                }
                BufferedOp::Remove => {
                    if let Ok(pos) = ids.binary_search(id) {
                        ids.remove(pos);
                    }
                }
            }
        }
        ids
    }

    fn contains(&self, tag: TagId, id: &EntityId) -> bool {
        // Buffered ops override the merged state, newest last
        let mut verdict = None;
        for (t, buffered_id, op) in &self.buffer {
            if t == &tag && buffered_id == id {
                verdict = Some(matches!(op, BufferedOp::Add));
            }
        }
        if let Some(v) = verdict {
            return v;
        }
        if !self.bloom.may_contain(pair_hash(tag, id)) {
            return false;
        }
        self.postings
            .get(&tag)
            .map(|list| list.binary_search(id).is_ok())
            .unwrap_or(false)
    }
}

fn pair_hash(tag: TagId, id: &EntityId) -> u64 {
    let mut hasher = FxHasher::default();
    tag.0.hash(&mut hasher);
    id.as_str().hash(&mut hasher);
    hasher.finish()
}

fn shard_for(tag: TagId) -> usize {
    let mut hasher = FxHasher::default();
    tag.0.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// The sharded tag → entity-ids index
#[derive(Debug)]
pub struct TagIndex {
    shards: Vec<RwLock<TagShard>>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        TagIndex {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(TagShard::new())).collect(),
        }
    }

    /// Record that `id` now carries `tag`
    pub fn add(&self, tag: TagId, id: EntityId) {
        let mut shard = self.shards[shard_for(tag)].write();
        shard.bloom.insert(pair_hash(tag, &id));
        shard.buffer.push((tag, id, BufferedOp::Add));
        if shard.buffer.len() >= MERGE_BUFFER_CAP {
            shard.merge();
        }
    }

    /// Record that `id` no longer carries `tag`
    pub fn remove(&self, tag: TagId, id: EntityId) {
        let mut shard = self.shards[shard_for(tag)].write();
        shard.buffer.push((tag, id, BufferedOp::Remove));
        if shard.buffer.len() >= MERGE_BUFFER_CAP {
            shard.merge();
        }
    }

    /// All entity ids carrying `tag`, sorted
    pub fn ids_for(&self, tag: TagId) -> Vec<EntityId> {
        self.shards[shard_for(tag)].read().merged_ids(tag)
    }

    /// Whether `id` carries `tag`; bloom-assisted fast negative
    pub fn contains(&self, tag: TagId, id: &EntityId) -> bool {
        self.shards[shard_for(tag)].read().contains(tag, id)
    }

    /// Merge every shard's append buffer into its packed postings
    ///
    /// Called by the background scheduler on its merge cadence.
    pub fn merge_all(&self) {
        for shard in &self.shards {
            shard.write().merge();
        }
    }

    /// Total buffered (unmerged) operations
    pub fn buffered_len(&self) -> usize {
        self.shards.iter().map(|s| s.read().buffer.len()).sum()
    }

    /// Drop every posting and buffer (compaction swap rebuilds from scratch)
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.write();
            shard.postings.clear();
            shard.buffer.clear();
            shard.bloom.clear();
        }
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::Timestamp;

    fn id(n: i64) -> EntityId {
        EntityId::generate(Timestamp::from_nanos(n))
    }

    #[test]
    fn test_add_then_query() {
        let index = TagIndex::new();
        let a = id(1);
        let b = id(2);
        index.add(TagId(7), a.clone());
        index.add(TagId(7), b.clone());
        index.add(TagId(8), a.clone());

        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(index.ids_for(TagId(7)), expected);
        assert_eq!(index.ids_for(TagId(8)), vec![a.clone()]);
        assert!(index.ids_for(TagId(9)).is_empty());
    }

    #[test]
    fn test_contains_before_and_after_merge() {
        let index = TagIndex::new();
        let a = id(1);
        index.add(TagId(1), a.clone());
        assert!(index.contains(TagId(1), &a));

        index.merge_all();
        assert!(index.contains(TagId(1), &a));
        assert!(!index.contains(TagId(2), &a));
    }

    #[test]
    fn test_remove_wins_over_earlier_add() {
        let index = TagIndex::new();
        let a = id(1);
        index.add(TagId(1), a.clone());
        index.remove(TagId(1), a.clone());

        assert!(!index.contains(TagId(1), &a));
        assert!(index.ids_for(TagId(1)).is_empty());

        index.merge_all();
        assert!(!index.contains(TagId(1), &a));
        assert!(index.ids_for(TagId(1)).is_empty());
    }

    #[test]
    fn test_readd_after_merge_and_remove() {
        let index = TagIndex::new();
        let a = id(1);
        index.add(TagId(1), a.clone());
        index.merge_all();
        index.remove(TagId(1), a.clone());
        index.add(TagId(1), a.clone());

        assert!(index.contains(TagId(1), &a));
        index.merge_all();
        assert_eq!(index.ids_for(TagId(1)), vec![a]);
    }

    #[test]
    fn test_buffer_cap_forces_merge() {
        let index = TagIndex::new();
        // Everything lands in the shard for TagId(1)
        for n in 0..(MERGE_BUFFER_CAP as i64 + 10) {
            index.add(TagId(1), id(n));
        }
        // At least one inline merge must have fired
        assert!(index.buffered_len() < MERGE_BUFFER_CAP);
        assert_eq!(
            index.ids_for(TagId(1)).len(),
            MERGE_BUFFER_CAP + 10
        );
    }

    #[test]
    fn test_clear() {
        let index = TagIndex::new();
        index.add(TagId(1), id(1));
        index.merge_all();
        index.clear();
        assert!(index.ids_for(TagId(1)).is_empty());
        assert_eq!(index.buffered_len(), 0);
    }
}
