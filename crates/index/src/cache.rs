//! Bounded entity cache
//!
//! A sharded LRU of materialized entities keyed by id. The pressure
//! monitor halves capacities under soft memory pressure and flushes the
//! cache entirely under hard pressure.

use entitydb_core::{Entity, EntityId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of cache shards (fewer than the lock shards; each holds an LRU)
const CACHE_SHARDS: usize = 16;

/// Default total cache capacity in entities
pub const DEFAULT_CACHE_CAPACITY: usize = 16 * 1024;

/// Counters exposed by [`EntityCache::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses
    pub misses: u64,
    /// Current total capacity (entities)
    pub capacity: usize,
    /// Cached entries right now
    pub len: usize,
}

/// Sharded LRU cache of materialized entities
#[derive(Debug)]
pub struct EntityCache {
    shards: Vec<Mutex<LruCache<EntityId, Arc<Entity>>>>,
    capacity: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EntityCache {
    /// Create a cache with the given total capacity
    pub fn new(capacity: usize) -> Self {
        let per_shard = per_shard_cap(capacity);
        EntityCache {
            shards: (0..CACHE_SHARDS)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            capacity: AtomicUsize::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, id: &EntityId) -> &Mutex<LruCache<EntityId, Arc<Entity>>> {
        &self.shards[id.shard(CACHE_SHARDS)]
    }

    /// Look up an entity
    pub fn get(&self, id: &EntityId) -> Option<Arc<Entity>> {
        let hit = self.shard(id).lock().get(id).cloned();
        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Insert or refresh an entity
    pub fn put(&self, entity: Arc<Entity>) {
        self.shard(&entity.id).lock().put(entity.id.clone(), entity);
    }

    /// Drop one entity (after a write invalidates it)
    pub fn invalidate(&self, id: &EntityId) {
        self.shard(id).lock().pop(id);
    }

    /// Drop everything
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Current total capacity
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Resize the cache, evicting LRU entries as needed
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        let per_shard = per_shard_cap(capacity);
        for shard in &self.shards {
            shard.lock().resize(per_shard);
        }
    }

    /// Hit/miss/occupancy counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            capacity: self.capacity(),
            len: self.shards.iter().map(|s| s.lock().len()).sum(),
        }
    }
}

fn per_shard_cap(total: usize) -> NonZeroUsize {
    NonZeroUsize::new((total / CACHE_SHARDS).max(1)).expect("nonzero cache capacity")
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::Timestamp;

    fn entity(n: i64) -> Arc<Entity> {
        Arc::new(Entity {
            id: EntityId::generate(Timestamp::from_nanos(n)),
            tags: Vec::new(),
            content: vec![n as u8],
        })
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = EntityCache::new(64);
        let e = entity(1);
        assert!(cache.get(&e.id).is_none());

        cache.put(e.clone());
        assert_eq!(cache.get(&e.id).unwrap().content, e.content);

        cache.invalidate(&e.id);
        assert!(cache.get(&e.id).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = EntityCache::new(CACHE_SHARDS);
        // Fill well past total capacity; each shard holds at most 1
        for n in 0..200 {
            cache.put(entity(n));
        }
        assert!(cache.stats().len <= CACHE_SHARDS);
    }

    #[test]
    fn test_resize_and_clear() {
        let cache = EntityCache::new(64);
        for n in 0..32 {
            cache.put(entity(n));
        }
        cache.set_capacity(CACHE_SHARDS);
        assert!(cache.stats().len <= CACHE_SHARDS);
        assert_eq!(cache.capacity(), CACHE_SHARDS);

        cache.clear();
        assert_eq!(cache.stats().len, 0);
    }
}
