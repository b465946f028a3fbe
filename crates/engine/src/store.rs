//! The store facade
//!
//! `Store` wires the unified file, dictionary, and indexes into the write
//! and read paths. Every mutation follows the same shape: take the
//! entity's shard lock, append WAL frames, fsync per the durability
//! policy, apply to the record section and the in-memory indexes, return.
//! A failed WAL append leaves no visible state change; a failed
//! application after the WAL append flips the engine read-only and the
//! next startup replays the WAL.

use crate::background::IntervalWorker;
use crate::config::EngineConfig;
use crate::dataset::DatasetRouter;
use crate::recovery::{open_store, RecoveryReport};
use crate::temporal::fold_live;
use entitydb_core::limits::{
    DELTA_REWRITE_BYTES, DELTA_REWRITE_EVENTS, MAX_CONTENT_LEN, MAX_TAG_EVENTS, SHARD_COUNT,
};
use entitydb_core::{
    DbResult, Entity, EntityDbError, EntityId, Polarity, TagEvent, TagValue, TaggedAtTime,
    Timestamp, EVENT_ENCODED_LEN,
};
use entitydb_index::{
    CacheStats, EntityCache, EntityTimeline, PressureMonitor, TagIndex, TemporalIndex,
    MERGE_INTERVAL_MS,
};
use entitydb_storage::format::wal;
use entitydb_storage::{
    write_compacted, OffsetMap, Quarantine, RecordFrame, RecordReader, StoreFile, SyncPolicy,
    TagDictionary, WalFrame, WalOp,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use smallvec::smallvec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Chunk threshold re-exported for callers sizing payloads
pub use entitydb_core::limits::CHUNK_SIZE;

/// A consistent view of the file and its maps, swapped at compaction
#[derive(Debug, Clone)]
pub(crate) struct CurrentFile {
    pub(crate) file: Arc<StoreFile>,
    pub(crate) offsets: Arc<OffsetMap>,
    pub(crate) quarantine: Arc<Quarantine>,
}

impl CurrentFile {
    pub(crate) fn reader(&self) -> RecordReader {
        RecordReader::new(
            self.file.clone(),
            self.offsets.clone(),
            self.quarantine.clone(),
        )
    }
}

#[derive(Debug, Default)]
struct DeltaState {
    events: usize,
    bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    appends: AtomicU64,
    replaces: AtomicU64,
    compactions: AtomicU64,
}

/// A point-in-time snapshot of engine statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Live entities
    pub entities: usize,
    /// WAL bytes in use
    pub wal_used: u64,
    /// Interned tag values
    pub dictionary_size: usize,
    /// Entity cache counters
    pub cache: CacheStats,
    /// Highest assigned LSN
    pub last_lsn: u64,
    /// Entities created since open
    pub creates: u64,
    /// Tag events appended since open
    pub appends: u64,
    /// Content replacements since open
    pub replaces: u64,
    /// Compaction runs since open
    pub compactions: u64,
    /// Quarantined record spans
    pub quarantined: usize,
    /// Whether the engine refuses writes
    pub read_only: bool,
    /// Time since open
    pub uptime: Duration,
}

/// Options for a purge run inside compaction
///
/// Requires the admin capability, enforced by the RBAC gate before the
/// call reaches the engine.
#[derive(Debug, Clone, Copy)]
pub struct PurgeOptions {
    /// Events strictly older than this are folded into a baseline
    pub horizon: Timestamp,
}

/// What a compaction run did
#[derive(Debug, Clone, Copy)]
pub struct CompactionReport {
    /// Entities carried into the new file
    pub entities: usize,
    /// Events dropped by the purge fold (0 without purge)
    pub purged_events: usize,
}

/// The temporal tag store
pub struct Store {
    pub(crate) config: EngineConfig,
    pub(crate) dict: Arc<TagDictionary>,
    pub(crate) tag_index: Arc<TagIndex>,
    pub(crate) temporal: Arc<TemporalIndex>,
    pub(crate) cache: Arc<EntityCache>,
    pub(crate) datasets: Arc<DatasetRouter>,
    pub(crate) coalescing: Arc<AtomicBool>,
    read_only: AtomicBool,
    lsn: AtomicU64,
    sync_policy: SyncPolicy,
    pending_sync: AtomicBool,
    entity_locks: Vec<Mutex<()>>,
    pub(crate) current: RwLock<CurrentFile>,
    compact_gate: RwLock<()>,
    deltas: Mutex<FxHashMap<EntityId, DeltaState>>,
    counters: Counters,
    recovery: RecoveryReport,
    started: Instant,
}

impl Store {
    /// Open (or create) the store at the configured data path
    ///
    /// Runs the full recovery pipeline: header validation, dictionary
    /// load, record-section scan, and WAL replay from `wal_off`.
    pub fn open(config: EngineConfig) -> DbResult<Arc<Self>> {
        let opened = open_store(&config)?;
        let store = Store {
            dict: opened.dict,
            tag_index: opened.tag_index,
            temporal: opened.temporal,
            cache: Arc::new(EntityCache::new(config.cache_capacity)),
            datasets: opened.datasets,
            coalescing: Arc::new(AtomicBool::new(true)),
            read_only: AtomicBool::new(false),
            lsn: AtomicU64::new(opened.last_lsn),
            sync_policy: SyncPolicy::new(config.durability),
            pending_sync: AtomicBool::new(false),
            entity_locks: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
            current: RwLock::new(CurrentFile {
                file: opened.file,
                offsets: opened.offsets,
                quarantine: opened.quarantine,
            }),
            compact_gate: RwLock::new(()),
            deltas: Mutex::new(FxHashMap::default()),
            counters: Counters::default(),
            recovery: opened.report,
            started: Instant::now(),
            config,
        };
        Ok(Arc::new(store))
    }

    /// What recovery found when this store was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Spawn the background workers: index merge + group-commit flush,
    /// and the memory pressure monitor
    pub fn start_background(self: &Arc<Self>) -> EngineWorkers {
        let merge_store = Arc::clone(self);
        let merge = IntervalWorker::spawn(
            "merge",
            Duration::from_millis(MERGE_INTERVAL_MS),
            move || {
                merge_store.tag_index.merge_all();
                if let Err(e) = merge_store.flush_wal() {
                    error!(target: "entitydb::wal", error = %e, "background wal flush failed");
                }
            },
        );
        let pressure = PressureMonitor::spawn(
            self.config.pressure,
            self.cache.clone(),
            self.coalescing.clone(),
        );
        EngineWorkers {
            workers: vec![merge],
            pressure: Some(pressure),
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Create an entity
    ///
    /// Allocates a fresh id unless one is supplied, interns all tag
    /// values, stamps events with the current nanosecond timestamp, and
    /// returns the materialized entity. Content over the chunk threshold
    /// is transparently split into sibling chunk entities.
    pub fn create(
        &self,
        tags: Vec<TagValue>,
        content: Vec<u8>,
        explicit_id: Option<EntityId>,
    ) -> DbResult<Entity> {
        self.ensure_writable()?;
        if content.len() as u64 > MAX_CONTENT_LEN {
            return Err(EntityDbError::payload_too_large(
                "content",
                MAX_CONTENT_LEN,
                content.len() as u64,
            ));
        }
        if tags.len() > MAX_TAG_EVENTS {
            return Err(EntityDbError::payload_too_large(
                "tags",
                MAX_TAG_EVENTS as u64,
                tags.len() as u64,
            ));
        }

        let now = Timestamp::now();
        let id = match explicit_id {
            Some(id) => id,
            None => EntityId::generate(now),
        };
        // Fail duplicates before any chunk siblings get written
        if self.current().offsets.contains(&id) {
            return Err(EntityDbError::conflict(format!(
                "entity {} already exists",
                id
            )));
        }

        let mut final_tags = tags;
        let (stored, entity_content) = if content.len() > CHUNK_SIZE {
            self.create_chunks(&id, &content, &final_tags)?;
            final_tags.push(TagValue::parse("content:chunked:true")?);
            final_tags.push(TagValue::parse(&format!(
                "content:sha256:{}",
                sha256_hex(&content)
            ))?);
            (Vec::new(), content)
        } else {
            (content.clone(), content)
        };

        let events = match self.create_record(&id, &final_tags, &stored, now) {
            Err(e) if is_wal_full(&e) => {
                self.compact(None)?;
                self.create_record(&id, &final_tags, &stored, now)?
            }
            other => other?,
        };

        let live = fold_live(&events, Timestamp::MAX);
        let tags = self.resolve_tagged(&live)?;
        let entity = Entity {
            id: id.clone(),
            tags,
            content: entity_content,
        };
        self.datasets.assign(&id, entity.dataset());
        self.cache.put(Arc::new(entity.clone()));
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        Ok(entity)
    }

    fn create_chunks(&self, parent: &EntityId, content: &[u8], tags: &[TagValue]) -> DbResult<()> {
        let dataset_tag = tags.iter().rev().find(|t| t.dataset_name().is_some());
        for (n, piece) in content.chunks(CHUNK_SIZE).enumerate() {
            let mut chunk_tags = vec![TagValue::parse(&format!(
                "content:chunk:{}:of:{}",
                n, parent
            ))?];
            if let Some(tag) = dataset_tag {
                chunk_tags.push(tag.clone());
            }
            self.create(chunk_tags, piece.to_vec(), None)?;
        }
        Ok(())
    }

    fn create_record(
        &self,
        id: &EntityId,
        tags: &[TagValue],
        stored: &[u8],
        now: Timestamp,
    ) -> DbResult<Vec<TagEvent>> {
        let _guard = self.entity_locks[id.shard(SHARD_COUNT)].lock();
        let _gate = self.compact_gate.read();
        let cur = self.current();
        if cur.offsets.contains(id) {
            return Err(EntityDbError::conflict(format!(
                "entity {} already exists",
                id
            )));
        }

        let mut new_tags = Vec::new();
        let mut events = Vec::with_capacity(tags.len());
        for tag in tags {
            let tid = self.intern_tracking(tag, &mut new_tags)?;
            events.push(TagEvent::add(now, tid));
        }

        let frame = RecordFrame::new(id.clone(), events.clone(), stored.to_vec());
        let frame_bytes = frame.encode();
        cur.file.mark_dirty()?;

        let frame = WalFrame::new(
            self.next_lsn(),
            WalOp::Create,
            wal::encode_payload(&new_tags, &frame_bytes),
        );
        cur.file.append_wal(&frame.encode())?;
        self.sync_if_due(&cur)?;

        let offset = cur
            .file
            .append_record(&frame_bytes)
            .map_err(|e| self.apply_failure(e))?;
        cur.offsets.insert(id.clone(), offset);
        for ev in &events {
            self.temporal.append_event(id, *ev);
            self.tag_index.add(ev.tag, id.clone());
        }
        self.temporal.push_content_version(id, now, offset);
        Ok(events)
    }

    /// Append tag events to an existing entity
    ///
    /// Removes apply before adds, all sharing one timestamp and one LSN
    /// block. The record frame is not rewritten until the accumulated
    /// delta passes the rewrite thresholds (or coalescing is disabled
    /// under memory pressure).
    pub fn append_tags(
        &self,
        id: &EntityId,
        add: &[TagValue],
        remove: &[TagValue],
    ) -> DbResult<()> {
        match self.try_append_tags(id, add, remove) {
            Err(e) if is_wal_full(&e) => {
                self.compact(None)?;
                self.try_append_tags(id, add, remove)
            }
            other => other,
        }
    }

    fn try_append_tags(
        &self,
        id: &EntityId,
        add: &[TagValue],
        remove: &[TagValue],
    ) -> DbResult<()> {
        self.ensure_writable()?;
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }

        let now = Timestamp::now();
        let _guard = self.entity_locks[id.shard(SHARD_COUNT)].lock();
        let _gate = self.compact_gate.read();
        let cur = self.current();
        if !cur.offsets.contains(id) {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        }

        let existing = self
            .temporal
            .timeline(id)
            .map(|t| t.event_count())
            .unwrap_or(0);
        if existing + add.len() + remove.len() > MAX_TAG_EVENTS {
            return Err(EntityDbError::payload_too_large(
                "tag events",
                MAX_TAG_EVENTS as u64,
                (existing + add.len() + remove.len()) as u64,
            ));
        }

        let mut new_tags = Vec::new();
        let mut events = Vec::with_capacity(add.len() + remove.len());
        for tag in remove {
            let tid = self.intern_tracking(tag, &mut new_tags)?;
            events.push(TagEvent::remove(now, tid));
        }
        for tag in add {
            let tid = self.intern_tracking(tag, &mut new_tags)?;
            events.push(TagEvent::add(now, tid));
        }

        cur.file.mark_dirty()?;
        let lsn = self.next_lsn();
        for (i, ev) in events.iter().enumerate() {
            let prelude = if i == 0 { new_tags.as_slice() } else { &[] };
            let frame = WalFrame::new(
                lsn,
                WalOp::AppendTag,
                wal::encode_payload(prelude, &wal::encode_append_body(id, ev)),
            );
            cur.file.append_wal(&frame.encode())?;
        }
        self.sync_if_due(&cur)?;

        for ev in &events {
            self.temporal.append_event(id, *ev);
            match ev.polarity {
                Polarity::Add => self.tag_index.add(ev.tag, id.clone()),
                Polarity::Remove => self.tag_index.remove(ev.tag, id.clone()),
            }
        }

        let should_rewrite = {
            let mut deltas = self.deltas.lock();
            let delta = deltas.entry(id.clone()).or_default();
            delta.events += events.len();
            delta.bytes += events.len() * EVENT_ENCODED_LEN;
            !self.coalescing.load(Ordering::Acquire)
                || delta.events >= DELTA_REWRITE_EVENTS
                || delta.bytes >= DELTA_REWRITE_BYTES
        };
        if should_rewrite {
            self.rewrite_record(&cur, id)
                .map_err(|e| self.apply_failure(e))?;
        }

        self.refresh_dataset(&cur, id);
        self.cache.invalidate(id);
        self.counters
            .appends
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Replace an entity's content
    ///
    /// Appends a `content:version:<n>` tag transition, writes a new
    /// record frame, and tombstones the old frame by id redirection.
    /// Oversized content is chunked; superseded chunk entities are
    /// soft-deleted and unlinked.
    pub fn replace_content(&self, id: &EntityId, content: Vec<u8>) -> DbResult<()> {
        self.ensure_writable()?;
        if content.len() as u64 > MAX_CONTENT_LEN {
            return Err(EntityDbError::payload_too_large(
                "content",
                MAX_CONTENT_LEN,
                content.len() as u64,
            ));
        }
        if !self.current().offsets.contains(id) {
            return Err(EntityDbError::not_found(format!("entity {}", id)));
        }

        let old_chunks = self.chunk_entities_of(id)?;

        let mut extra_add = Vec::new();
        let stored = if content.len() > CHUNK_SIZE {
            let dataset = self.datasets.dataset_of(id);
            let dataset_tags = if &*dataset == entitydb_core::DEFAULT_DATASET {
                Vec::new()
            } else {
                vec![TagValue::dataset(&dataset)]
            };
            self.create_chunks_for_replace(id, &content, &dataset_tags)?;
            extra_add.push(TagValue::parse("content:chunked:true")?);
            extra_add.push(TagValue::parse(&format!(
                "content:sha256:{}",
                sha256_hex(&content)
            ))?);
            Vec::new()
        } else {
            content
        };

        match self.try_replace(id, &stored, &extra_add) {
            Err(e) if is_wal_full(&e) => {
                self.compact(None)?;
                self.try_replace(id, &stored, &extra_add)?;
            }
            other => other?,
        }

        // Retire superseded chunks outside the parent's lock
        let soft_deleted = TagValue::lifecycle("soft_deleted");
        for (chunk_id, chunk_tag) in old_chunks {
            let _ = self.append_tags(
                &chunk_id,
                std::slice::from_ref(&soft_deleted),
                std::slice::from_ref(&chunk_tag),
            );
        }
        self.counters.replaces.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_chunks_for_replace(
        &self,
        parent: &EntityId,
        content: &[u8],
        dataset_tags: &[TagValue],
    ) -> DbResult<()> {
        for (n, piece) in content.chunks(CHUNK_SIZE).enumerate() {
            let mut chunk_tags = vec![TagValue::parse(&format!(
                "content:chunk:{}:of:{}",
                n, parent
            ))?];
            chunk_tags.extend_from_slice(dataset_tags);
            self.create(chunk_tags, piece.to_vec(), None)?;
        }
        Ok(())
    }

    fn try_replace(&self, id: &EntityId, stored: &[u8], extra_add: &[TagValue]) -> DbResult<()> {
        let now = Timestamp::now();
        let _guard = self.entity_locks[id.shard(SHARD_COUNT)].lock();
        let _gate = self.compact_gate.read();
        let cur = self.current();

        let timeline = self
            .temporal
            .timeline(id)
            .ok_or_else(|| EntityDbError::not_found(format!("entity {}", id)))?;
        let full = self.full_events_with(&cur, id, &timeline)?;

        // Retire content tags that no longer describe the entity
        let live = fold_live(&full, Timestamp::MAX);
        let live_tags = self.resolve_tagged(&live)?;
        let mut removes: Vec<TagValue> = live_tags
            .iter()
            .filter(|t| t.value.as_str().starts_with("content:sha256:"))
            .map(|t| t.value.clone())
            .collect();
        let now_chunked = extra_add
            .iter()
            .any(|t| t.as_str() == "content:chunked:true");
        if !now_chunked {
            removes.extend(
                live_tags
                    .iter()
                    .filter(|t| t.value.as_str() == "content:chunked:true")
                    .map(|t| t.value.clone()),
            );
        }

        let version = timeline.content_versions.len();
        let version_tag = TagValue::parse(&format!("content:version:{}", version))?;

        let mut new_tags = Vec::new();
        let mut new_events = Vec::new();
        for tag in &removes {
            let tid = self.intern_tracking(tag, &mut new_tags)?;
            new_events.push(TagEvent::remove(now, tid));
        }
        for tag in extra_add {
            // Skip re-adding a tag that is already live (chunked:true)
            if live_tags.iter().any(|t| &t.value == tag) {
                continue;
            }
            let tid = self.intern_tracking(tag, &mut new_tags)?;
            new_events.push(TagEvent::add(now, tid));
        }
        let tid = self.intern_tracking(&version_tag, &mut new_tags)?;
        new_events.push(TagEvent::add(now, tid));

        if full.len() + new_events.len() > MAX_TAG_EVENTS {
            return Err(EntityDbError::payload_too_large(
                "tag events",
                MAX_TAG_EVENTS as u64,
                (full.len() + new_events.len()) as u64,
            ));
        }

        let mut all_events = full;
        all_events.extend(new_events.iter().copied());
        let frame = RecordFrame::new(id.clone(), all_events, stored.to_vec());
        let frame_bytes = frame.encode();

        cur.file.mark_dirty()?;
        let wal_frame = WalFrame::new(
            self.next_lsn(),
            WalOp::ReplaceContent,
            wal::encode_payload(&new_tags, &frame_bytes),
        );
        cur.file.append_wal(&wal_frame.encode())?;
        self.sync_if_due(&cur)?;

        let offset = cur
            .file
            .append_record(&frame_bytes)
            .map_err(|e| self.apply_failure(e))?;
        cur.offsets.insert(id.clone(), offset);
        for ev in &new_events {
            self.temporal.append_event(id, *ev);
            match ev.polarity {
                Polarity::Add => self.tag_index.add(ev.tag, id.clone()),
                Polarity::Remove => self.tag_index.remove(ev.tag, id.clone()),
            }
        }
        self.temporal.push_content_version(id, now, offset);
        self.deltas.lock().remove(id);
        self.refresh_dataset(&cur, id);
        self.cache.invalidate(id);
        Ok(())
    }

    /// Soft-delete: append `lifecycle:state:soft_deleted` without erasing
    /// any history
    pub fn soft_delete(&self, id: &EntityId) -> DbResult<()> {
        self.append_tags(id, &[TagValue::lifecycle("soft_deleted")], &[])
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Force pending WAL bytes to disk (group-commit backstop)
    pub fn flush_wal(&self) -> DbResult<()> {
        if self.pending_sync.swap(false, Ordering::AcqRel) {
            self.current().file.sync()?;
            self.sync_policy.note_flush();
        }
        Ok(())
    }

    /// Compact the unified file, optionally purging history
    ///
    /// Live records are rewritten with merged events to a temp file that
    /// is renamed over the live one; writers queue at the coarse gate,
    /// readers keep serving from the old mapping until the swap.
    pub fn compact(&self, purge: Option<&PurgeOptions>) -> DbResult<CompactionReport> {
        let _gate = self.compact_gate.write();
        let cur = self.current();

        // Breadcrumb in the old WAL; best effort since the region may be full
        let mark = WalFrame::new(self.next_lsn(), WalOp::CompactMark, Vec::new());
        let _ = cur.file.append_wal(&mark.encode());

        let mut pairs = cur.offsets.snapshot();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut purged_events = 0usize;
        let mut kept: Vec<(EntityId, Vec<TagEvent>, Timestamp)> = Vec::with_capacity(pairs.len());
        let mut frames: Vec<RecordFrame> = Vec::with_capacity(pairs.len());
        let reader = cur.reader();
        for (id, _off) in pairs {
            let Some(timeline) = self.temporal.timeline(&id) else {
                continue;
            };
            let mut events = self.full_events_with(&cur, &id, &timeline)?;
            if let Some(purge) = purge {
                let (folded, dropped) = purge_fold(&events, purge.horizon);
                purged_events += dropped;
                events = folded;
            }
            let content = match reader.read(&id)? {
                Some(frame) => frame.content,
                None => Vec::new(),
            };
            let version_ts = timeline
                .content_versions
                .last()
                .map(|(ts, _)| *ts)
                .unwrap_or_else(|| id.created_at());
            kept.push((id.clone(), events.clone(), version_ts));
            frames.push(RecordFrame::new(id, events, content));
        }

        let dict_bytes = self.dict.encode();
        let (new_file, new_offsets) = write_compacted(
            &self.config.file_path(),
            self.config.wal_capacity,
            &dict_bytes,
            frames.into_iter(),
            0,
        )?;
        let new_offsets = Arc::new(new_offsets);

        // Install the new mapping; this is the instant readers switch over
        {
            let mut current = self.current.write();
            *current = CurrentFile {
                file: Arc::new(new_file),
                offsets: new_offsets.clone(),
                quarantine: Arc::new(Quarantine::new()),
            };
        }

        // Timelines must point at the new frames; per-version offsets from
        // the old file are gone along with the superseded frames
        let entities = kept.len();
        for (id, events, version_ts) in kept {
            let Some(offset) = new_offsets.get(&id) else {
                continue;
            };
            self.temporal.set_timeline(
                &id,
                EntityTimeline {
                    events,
                    spilled: 0,
                    content_versions: smallvec![(version_ts, offset)],
                },
            );
        }
        self.deltas.lock().clear();
        self.counters.compactions.fetch_add(1, Ordering::Relaxed);

        Ok(CompactionReport {
            entities,
            purged_events,
        })
    }

    /// Graceful shutdown: flush dirty record deltas, sync, stamp
    /// `last_clean`, and refuse further writes
    pub fn shutdown(&self) -> DbResult<()> {
        let ids: Vec<EntityId> = self.deltas.lock().keys().cloned().collect();
        for id in &ids {
            let _guard = self.entity_locks[id.shard(SHARD_COUNT)].lock();
            let _gate = self.compact_gate.read();
            let cur = self.current();
            if let Err(e) = self.rewrite_record(&cur, id) {
                error!(target: "entitydb::store", entity = %id, error = %e, "delta flush failed at shutdown");
            }
        }

        let cur = self.current();
        cur.file.sync()?;
        cur.file
            .flush_header(Timestamp::now().as_nanos() as u64)?;
        self.read_only.store(true, Ordering::Release);

        let stats = self.stats();
        info!(
            target: "entitydb::store",
            entities = stats.entities,
            wal_used = stats.wal_used,
            dictionary = stats.dictionary_size,
            cache_hits = stats.cache.hits,
            cache_misses = stats.cache.misses,
            "store closed cleanly"
        );
        Ok(())
    }

    /// The dataset an entity belongs to (`default` when unassigned)
    pub fn dataset_of(&self, id: &EntityId) -> String {
        self.datasets.dataset_of(id).to_string()
    }

    /// Engine statistics snapshot
    pub fn stats(&self) -> StoreStats {
        let cur = self.current();
        StoreStats {
            entities: cur.offsets.len(),
            wal_used: cur.file.wal_used(),
            dictionary_size: self.dict.len(),
            cache: self.cache.stats(),
            last_lsn: self.lsn.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
            appends: self.counters.appends.load(Ordering::Relaxed),
            replaces: self.counters.replaces.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
            quarantined: cur.quarantine.len(),
            read_only: self.read_only.load(Ordering::Acquire),
            uptime: self.started.elapsed(),
        }
    }

    // =========================================================================
    // Internal helpers (shared with query/temporal/recovery modules)
    // =========================================================================

    pub(crate) fn current(&self) -> CurrentFile {
        self.current.read().clone()
    }

    fn next_lsn(&self) -> u64 {
        self.lsn.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_writable(&self) -> DbResult<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(EntityDbError::io("engine is in read-only mode"));
        }
        Ok(())
    }

    /// Mark the engine read-only after a post-WAL application failure
    fn apply_failure(&self, e: EntityDbError) -> EntityDbError {
        if matches!(e, EntityDbError::Io { .. }) {
            error!(target: "entitydb::store", error = %e, "application failed after wal append, entering read-only mode");
            self.read_only.store(true, Ordering::Release);
        }
        e
    }

    fn intern_tracking(
        &self,
        tag: &TagValue,
        new_tags: &mut Vec<(entitydb_core::TagId, String)>,
    ) -> DbResult<entitydb_core::TagId> {
        let is_new = self.dict.lookup_id(tag.as_str()).is_none();
        let tid = self.dict.intern(tag.as_str())?;
        if is_new {
            new_tags.push((tid, tag.as_str().to_string()));
        }
        Ok(tid)
    }

    fn sync_if_due(&self, cur: &CurrentFile) -> DbResult<()> {
        self.pending_sync.store(true, Ordering::Release);
        if self.sync_policy.should_sync() {
            cur.file.sync()?;
            self.pending_sync.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Rewrite an entity's record frame with its merged event history
    pub(crate) fn rewrite_record(&self, cur: &CurrentFile, id: &EntityId) -> DbResult<()> {
        let Some(timeline) = self.temporal.timeline(id) else {
            return Ok(());
        };
        let events = self.full_events_with(cur, id, &timeline)?;
        let content = match cur.reader().read(id)? {
            Some(frame) => frame.content,
            None => Vec::new(),
        };
        let frame = RecordFrame::new(id.clone(), events, content);
        let offset = cur.file.append_record(&frame.encode())?;
        cur.offsets.insert(id.clone(), offset);
        self.temporal.redirect_live_offset(id, offset);
        self.deltas.lock().remove(id);
        Ok(())
    }

    /// Full event history: RAM suffix stitched onto the record frame
    pub(crate) fn full_events_with(
        &self,
        cur: &CurrentFile,
        id: &EntityId,
        timeline: &EntityTimeline,
    ) -> DbResult<Vec<TagEvent>> {
        if timeline.spilled == 0 {
            return Ok(timeline.events.clone());
        }
        let frame = cur.reader().read(id)?.ok_or_else(|| {
            EntityDbError::internal(format!("spilled timeline without record frame: {}", id))
        })?;
        let total = timeline.event_count();
        let after_frame = total.saturating_sub(frame.events.len());
        let mut events = frame.events;
        let ram = &timeline.events;
        events.extend_from_slice(&ram[ram.len().saturating_sub(after_frame)..]);
        Ok(events)
    }

    /// Resolve folded `(tag-id, effective-ts)` pairs to tag values
    pub(crate) fn resolve_tagged(
        &self,
        live: &[(entitydb_core::TagId, Timestamp)],
    ) -> DbResult<Vec<TaggedAtTime>> {
        let snapshot = self.dict.snapshot();
        live.iter()
            .map(|(tid, ts)| {
                let value = snapshot.lookup(*tid).ok_or_else(|| {
                    EntityDbError::internal(format!("dangling tag id {}", tid.0))
                })?;
                Ok(TaggedAtTime {
                    ts: *ts,
                    value: TagValue::parse(&value)?,
                })
            })
            .collect()
    }

    /// Recompute the entity's dataset from its live tag set
    pub(crate) fn refresh_dataset(&self, cur: &CurrentFile, id: &EntityId) {
        let Ok(Some(tags)) = self.live_tags(cur, id) else {
            return;
        };
        let dataset = tags
            .iter()
            .rev()
            .find_map(|t| t.value.dataset_name())
            .or_else(|| tags.iter().rev().find_map(|t| t.value.hub_name()))
            .unwrap_or(entitydb_core::DEFAULT_DATASET);
        self.datasets.assign(id, dataset);
    }

    /// The entity's live tag set, or None for an unknown id
    pub(crate) fn live_tags(
        &self,
        cur: &CurrentFile,
        id: &EntityId,
    ) -> DbResult<Option<Vec<TaggedAtTime>>> {
        let Some(timeline) = self.temporal.timeline(id) else {
            return Ok(None);
        };
        if !cur.offsets.contains(id) {
            return Ok(None);
        }
        let events = self.full_events_with(cur, id, &timeline)?;
        let live = fold_live(&events, Timestamp::MAX);
        Ok(Some(self.resolve_tagged(&live)?))
    }

    /// Chunk entities currently linked to a parent: `(chunk id, chunk tag)`
    /// sorted by chunk index
    pub(crate) fn chunk_entities_of(
        &self,
        id: &EntityId,
    ) -> DbResult<Vec<(EntityId, TagValue)>> {
        let snapshot = self.dict.snapshot();
        let suffix = format!(":of:{}", id);
        let mut chunks: Vec<(usize, EntityId, TagValue)> = Vec::new();
        for (tid, value) in snapshot.prefix_scan("content:chunk:") {
            let Some(rest) = value.strip_prefix("content:chunk:") else {
                continue;
            };
            let Some(n_str) = rest.strip_suffix(&suffix) else {
                continue;
            };
            let Ok(n) = n_str.parse::<usize>() else {
                continue;
            };
            for chunk_id in self.tag_index.ids_for(tid) {
                chunks.push((n, chunk_id, TagValue::parse(&value)?));
            }
        }
        chunks.sort_by_key(|(n, _, _)| *n);
        Ok(chunks.into_iter().map(|(_, id, tag)| (id, tag)).collect())
    }
}

/// Running background workers tied to a store
pub struct EngineWorkers {
    workers: Vec<IntervalWorker>,
    pressure: Option<PressureMonitor>,
}

impl EngineWorkers {
    /// Stop every worker and join their threads
    pub fn stop(mut self) {
        for worker in self.workers.drain(..) {
            worker.stop();
        }
        if let Some(pressure) = self.pressure.take() {
            pressure.stop();
        }
    }
}

fn is_wal_full(e: &EntityDbError) -> bool {
    matches!(e, EntityDbError::Backpressure { resource } if resource == "wal region full")
}

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Fold events older than the horizon into a baseline of add events
///
/// The baseline reproduces the live set as of the horizon, stamped at the
/// horizon, so every query at `t >= horizon` is unchanged. Returns the new
/// event vector and the number of events dropped.
fn purge_fold(events: &[TagEvent], horizon: Timestamp) -> (Vec<TagEvent>, usize) {
    let (old, recent): (Vec<TagEvent>, Vec<TagEvent>) =
        events.iter().copied().partition(|e| e.ts <= horizon);
    if old.is_empty() {
        return (events.to_vec(), 0);
    }
    let baseline: Vec<TagEvent> = fold_live(&old, Timestamp::MAX)
        .into_iter()
        .map(|(tid, _)| TagEvent::add(horizon, tid))
        .collect();
    let dropped = old.len() - baseline.len();
    let mut out = baseline;
    out.extend(recent);
    (out, dropped)
}
