//! The temporal index
//!
//! For each entity, a time-ordered vector of tag events plus the content
//! version history. Events are appended on write and never mutated. RAM
//! holds at most the last K events per entity; older events spill (the
//! record frame carries the full history, so overflow is demand-loaded by
//! the engine).
//!
//! A recently-changed structure keyed by last-event timestamp feeds
//! `changes_since` without scanning every entity.

use entitydb_core::limits::{SHARD_COUNT, TEMPORAL_RAM_CAP};
use entitydb_core::{EntityId, TagEvent, Timestamp};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Per-entity temporal state
#[derive(Debug, Clone, Default)]
pub struct EntityTimeline {
    /// Events in RAM, arrival order; a suffix of the full history when
    /// `spilled > 0`
    pub events: Vec<TagEvent>,
    /// Events dropped from RAM (still present in the record frame)
    pub spilled: usize,
    /// Content versions: `(effective timestamp, record frame offset)`,
    /// oldest first; the last entry is the live frame
    pub content_versions: SmallVec<[(Timestamp, u64); 2]>,
}

impl EntityTimeline {
    /// Total event count, RAM plus spilled
    pub fn event_count(&self) -> usize {
        self.spilled + self.events.len()
    }

    /// Timestamp of the newest event, if any
    pub fn last_event_ts(&self) -> Option<Timestamp> {
        self.events.iter().map(|e| e.ts).max()
    }

    /// The live record frame offset
    pub fn live_offset(&self) -> Option<u64> {
        self.content_versions.last().map(|(_, off)| *off)
    }

    /// The record frame offset holding content at time `t`
    ///
    /// The most recent version with effective timestamp ≤ t.
    pub fn offset_as_of(&self, t: Timestamp) -> Option<u64> {
        self.content_versions
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= t)
            .map(|(_, off)| *off)
    }
}

#[derive(Debug, Default)]
struct RecentlyChanged {
    by_time: BTreeMap<(Timestamp, EntityId), ()>,
    last: FxHashMap<EntityId, Timestamp>,
}

impl RecentlyChanged {
    fn touch(&mut self, id: &EntityId, ts: Timestamp) {
        if let Some(prev) = self.last.get(id) {
            if *prev >= ts {
                return;
            }
            self.by_time.remove(&(*prev, id.clone()));
        }
        self.last.insert(id.clone(), ts);
        self.by_time.insert((ts, id.clone()), ());
    }

    fn since(&self, t: Timestamp) -> Vec<(EntityId, Timestamp)> {
        let floor = (
            Timestamp::from_nanos(t.as_nanos().saturating_add(1)),
            EntityId::from_bytes(&[0u8; 32]),
        );
        self.by_time
            .range(floor..)
            .map(|((ts, id), _)| (id.clone(), *ts))
            .collect()
    }
}

/// The sharded temporal index
#[derive(Debug)]
pub struct TemporalIndex {
    shards: Vec<RwLock<FxHashMap<EntityId, EntityTimeline>>>,
    recent: Mutex<RecentlyChanged>,
    ram_cap: usize,
}

impl TemporalIndex {
    /// Create an empty index with the default per-entity RAM cap
    pub fn new() -> Self {
        Self::with_ram_cap(TEMPORAL_RAM_CAP)
    }

    /// Create an empty index with a custom per-entity RAM cap
    pub fn with_ram_cap(ram_cap: usize) -> Self {
        TemporalIndex {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(FxHashMap::default()))
                .collect(),
            recent: Mutex::new(RecentlyChanged::default()),
            ram_cap: ram_cap.max(1),
        }
    }

    fn shard(&self, id: &EntityId) -> &RwLock<FxHashMap<EntityId, EntityTimeline>> {
        &self.shards[id.shard(SHARD_COUNT)]
    }

    /// Append one event to an entity's timeline
    pub fn append_event(&self, id: &EntityId, event: TagEvent) {
        {
            let mut shard = self.shard(id).write();
            let timeline = shard.entry(id.clone()).or_default();
            timeline.events.push(event);
            if timeline.events.len() > self.ram_cap {
                let overflow = timeline.events.len() - self.ram_cap;
                timeline.events.drain(..overflow);
                timeline.spilled += overflow;
            }
        }
        self.recent.lock().touch(id, event.ts);
    }

    /// Record a new content version landing at `offset`
    pub fn push_content_version(&self, id: &EntityId, ts: Timestamp, offset: u64) {
        let mut shard = self.shard(id).write();
        let timeline = shard.entry(id.clone()).or_default();
        timeline.content_versions.push((ts, offset));
    }

    /// Redirect the live content version to a new frame offset
    ///
    /// Used when a delta-threshold rewrite appends a new frame without
    /// creating a new content version.
    pub fn redirect_live_offset(&self, id: &EntityId, offset: u64) {
        let mut shard = self.shard(id).write();
        if let Some(timeline) = shard.get_mut(id) {
            if let Some(last) = timeline.content_versions.last_mut() {
                last.1 = offset;
            }
        }
    }

    /// Install a fully rebuilt timeline (cold start, compaction swap)
    pub fn set_timeline(&self, id: &EntityId, mut timeline: EntityTimeline) {
        if timeline.events.len() > self.ram_cap {
            let overflow = timeline.events.len() - self.ram_cap;
            timeline.events.drain(..overflow);
            timeline.spilled += overflow;
        }
        let last_ts = timeline.last_event_ts();
        self.shard(id).write().insert(id.clone(), timeline);
        if let Some(ts) = last_ts {
            self.recent.lock().touch(id, ts);
        }
    }

    /// Clone an entity's timeline
    pub fn timeline(&self, id: &EntityId) -> Option<EntityTimeline> {
        self.shard(id).read().get(id).cloned()
    }

    /// Whether the exact event is already in the RAM suffix
    ///
    /// Used by WAL replay to stay idempotent. Bounded by the RAM cap: the
    /// WAL never outlives a compaction, so replayed events are recent.
    pub fn contains_event(&self, id: &EntityId, event: &TagEvent) -> bool {
        self.shard(id)
            .read()
            .get(id)
            .map(|t| t.events.contains(event))
            .unwrap_or(false)
    }

    /// Entities whose last event is strictly after `t`, oldest first
    pub fn touched_since(&self, t: Timestamp) -> Vec<(EntityId, Timestamp)> {
        self.recent.lock().since(t)
    }

    /// Number of entities with temporal state
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// True when no entity has temporal state
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (compaction swap rebuilds from the new file)
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        let mut recent = self.recent.lock();
        recent.by_time.clear();
        recent.last.clear();
    }
}

impl Default for TemporalIndex {
    fn default() -> Self {
        Self::new()
    }
}
