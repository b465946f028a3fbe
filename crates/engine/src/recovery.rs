//! Startup recovery
//!
//! Opening a store always runs the same pipeline:
//!
//! 1. unlink a stale compaction temp (the original file is authoritative)
//! 2. validate the header, load the dictionary section
//! 3. scan the WAL from `wal_off` and re-intern the tag strings its
//!    frames carry (dictionary growth since the last compaction)
//! 4. scan the record section, rebuilding the id→offset map and the
//!    per-entity timelines; corrupt spans are quarantined
//! 5. apply WAL frames idempotently: creates of known ids are skipped,
//!    tag events already in a timeline are skipped, content replacements
//!    matching the live frame are skipped
//! 6. rebuild the tag index and dataset router from the folded live sets
//!
//! Replay is idempotent because each frame encodes the intended state, so
//! replaying a cleanly shut down file is a no-op and replaying twice
//! equals replaying once.

use crate::config::EngineConfig;
use crate::dataset::DatasetRouter;
use crate::temporal::fold_live;
use entitydb_core::{DbResult, EntityDbError, EntityId, TagEvent, TagId, Timestamp};
use entitydb_index::{EntityTimeline, TagIndex, TemporalIndex};
use entitydb_storage::format::wal;
use entitydb_storage::{
    remove_stale_compact_temp, scan_records, scan_wal, OffsetMap, Quarantine, RecordFrame,
    StoreFile, TagDictionary, WalOp, WalStop,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{info, warn};

/// What recovery found and did
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Whether the file carried a `last_clean` stamp
    pub was_clean: bool,
    /// WAL frames scanned
    pub replayed_frames: usize,
    /// WAL frames that actually changed state (0 after a clean shutdown)
    pub applied_frames: usize,
    /// Corrupt record spans quarantined
    pub quarantined_spans: usize,
    /// Whether a torn WAL tail was cut off
    pub truncated_wal: bool,
    /// Live entities after recovery
    pub entities: usize,
}

pub(crate) struct OpenedStore {
    pub(crate) file: Arc<StoreFile>,
    pub(crate) dict: Arc<TagDictionary>,
    pub(crate) offsets: Arc<OffsetMap>,
    pub(crate) quarantine: Arc<Quarantine>,
    pub(crate) tag_index: Arc<TagIndex>,
    pub(crate) temporal: Arc<TemporalIndex>,
    pub(crate) datasets: Arc<DatasetRouter>,
    pub(crate) last_lsn: u64,
    pub(crate) report: RecoveryReport,
}

#[derive(Default)]
struct RebuildEntry {
    events: Vec<TagEvent>,
    /// `(version count, effective ts, frame offset)` per frame seen
    versions: Vec<(usize, Timestamp, u64)>,
}

pub(crate) fn open_store(config: &EngineConfig) -> DbResult<OpenedStore> {
    std::fs::create_dir_all(&config.data_path)?;
    let path = config.file_path();

    if remove_stale_compact_temp(&path)? {
        warn!(target: "entitydb::recovery", "removed stale compaction temp file");
    }

    let created = !path.exists();
    let file = if created {
        Arc::new(StoreFile::create(
            &path,
            config.wal_capacity,
            config.dict_capacity,
        )?)
    } else {
        Arc::new(StoreFile::open(&path)?)
    };
    let header = file.header();
    let was_clean = header.last_clean != 0;

    // Dictionary as of the last compaction
    let dict = match file.read_dict_section()? {
        Some(bytes) => Arc::new(TagDictionary::decode(&bytes).map_err(|e| {
            EntityDbError::corruption("dictionary section", e.to_string())
        })?),
        None => Arc::new(TagDictionary::new()),
    };

    // WAL first: its tag preludes complete the dictionary before any
    // record resolution happens
    let wal_scan = scan_wal(&file)?;
    for frame in &wal_scan.frames {
        let (new_tags, _) = wal::decode_payload(&frame.payload)
            .map_err(|e| EntityDbError::corruption("wal", e.to_string()))?;
        for (tid, value) in new_tags {
            dict.intern_existing(tid, &value)?;
        }
    }
    let truncated_wal = wal_scan.stop != WalStop::EndOfData;

    // Tag ids that mark content versions, resolvable now that the
    // dictionary is complete
    let version_tag_ids: FxHashSet<TagId> = dict
        .snapshot()
        .prefix_scan("content:version:")
        .into_iter()
        .map(|(tid, _)| tid)
        .collect();

    // Record section scan
    let record_scan = scan_records(&file, header.records_off, header.records_len)?;
    let quarantine = Arc::new(Quarantine::new());
    for offset in &record_scan.quarantined {
        quarantine.insert(*offset);
    }

    let offsets = Arc::new(OffsetMap::new());
    let mut rebuilt: FxHashMap<EntityId, RebuildEntry> = FxHashMap::default();
    for (offset, frame) in record_scan.frames {
        index_frame(&offsets, &mut rebuilt, &version_tag_ids, offset, frame);
    }

    // Extents: WAL high-water from the scan, appends resume after the
    // last decodable record
    file.set_extents(wal_scan.valid_len, record_scan.valid_end);

    // Apply WAL frames idempotently
    let temporal = Arc::new(TemporalIndex::with_ram_cap(config.temporal_ram_cap));
    let mut applied = 0usize;
    for frame in &wal_scan.frames {
        let (_, body) = wal::decode_payload(&frame.payload)
            .map_err(|e| EntityDbError::corruption("wal", e.to_string()))?;
        match frame.op {
            WalOp::Create => {
                let (record, _) = RecordFrame::decode(body)
                    .map_err(|e| EntityDbError::corruption("wal create frame", e.to_string()))?;
                if offsets.contains(&record.id) {
                    continue;
                }
                let offset = file.append_record(body)?;
                index_frame(&offsets, &mut rebuilt, &version_tag_ids, offset, record);
                applied += 1;
            }
            WalOp::AppendTag => {
                let (id, event) = wal::decode_append_body(body)
                    .map_err(|e| EntityDbError::corruption("wal append frame", e.to_string()))?;
                let entry = rebuilt.entry(id.clone()).or_default();
                if entry.events.contains(&event) {
                    continue;
                }
                entry.events.push(event);
                applied += 1;
            }
            WalOp::ReplaceContent => {
                let (record, _) = RecordFrame::decode(body).map_err(|e| {
                    EntityDbError::corruption("wal replace frame", e.to_string())
                })?;
                // Already applied (or superseded by a later frame) when the
                // rebuilt history carries every event this frame carries
                let already = rebuilt.get(&record.id).is_some_and(|entry| {
                    record.events.iter().all(|e| entry.events.contains(e))
                });
                if already {
                    continue;
                }
                let offset = file.append_record(body)?;
                // The replacement frame carries the full merged history
                rebuilt.remove(&record.id);
                index_frame(&offsets, &mut rebuilt, &version_tag_ids, offset, record);
                applied += 1;
            }
            WalOp::CompactMark => {}
        }
    }

    // Fold every rebuilt entity into the derived indexes
    let tag_index = Arc::new(TagIndex::new());
    let datasets = Arc::new(DatasetRouter::new());
    let snapshot = dict.snapshot();
    let entities = offsets.len();
    for (id, entry) in rebuilt {
        if !offsets.contains(&id) {
            continue;
        }

        let live = fold_live(&entry.events, Timestamp::MAX);
        for (tid, _) in &live {
            tag_index.add(*tid, id.clone());
        }

        let mut dataset: Option<String> = None;
        let mut hub: Option<String> = None;
        for (tid, _) in &live {
            if let Some(value) = snapshot.lookup(*tid) {
                if let Some(name) = value.strip_prefix("dataset:") {
                    dataset = Some(name.to_string());
                } else if let Some(name) = value.strip_prefix("hub:") {
                    hub = Some(name.to_string());
                }
            }
        }
        let name = dataset
            .or(hub)
            .unwrap_or_else(|| entitydb_core::DEFAULT_DATASET.to_string());
        datasets.assign(&id, &name);

        let mut versions = entry.versions;
        versions.sort_by_key(|(count, _, _)| *count);
        let mut content_versions: SmallVec<[(Timestamp, u64); 2]> = SmallVec::new();
        for (count, ts, offset) in versions {
            match content_versions.len().cmp(&count) {
                // A later frame at the same version supersedes (delta rewrite)
                std::cmp::Ordering::Greater => {
                    if let Some(last) = content_versions.last_mut() {
                        *last = (ts, offset);
                    }
                }
                _ => content_versions.push((ts, offset)),
            }
        }

        temporal.set_timeline(
            &id,
            EntityTimeline {
                events: entry.events,
                spilled: 0,
                content_versions,
            },
        );
    }
    tag_index.merge_all();

    let report = RecoveryReport {
        was_clean,
        replayed_frames: wal_scan.frames.len(),
        applied_frames: applied,
        quarantined_spans: quarantine.len(),
        truncated_wal,
        entities,
    };
    info!(
        target: "entitydb::recovery",
        was_clean = report.was_clean,
        replayed = report.replayed_frames,
        applied = report.applied_frames,
        quarantined = report.quarantined_spans,
        entities = report.entities,
        "store opened"
    );

    Ok(OpenedStore {
        file,
        dict,
        offsets,
        quarantine,
        tag_index,
        temporal,
        datasets,
        last_lsn: wal_scan.last_lsn(),
        report,
    })
}

fn index_frame(
    offsets: &OffsetMap,
    rebuilt: &mut FxHashMap<EntityId, RebuildEntry>,
    version_tag_ids: &FxHashSet<TagId>,
    offset: u64,
    frame: RecordFrame,
) {
    offsets.insert(frame.id.clone(), offset);
    let entry = rebuilt.entry(frame.id.clone()).or_default();

    let version_count = frame
        .events
        .iter()
        .filter(|e| version_tag_ids.contains(&e.tag))
        .count();
    let effective_ts = frame
        .events
        .iter()
        .filter(|e| version_tag_ids.contains(&e.tag))
        .map(|e| e.ts)
        .max()
        .or_else(|| frame.events.first().map(|e| e.ts))
        .unwrap_or_else(|| frame.id.created_at());
    entry.versions.push((version_count, effective_ts, offset));

    // The frame carries the full history as of its write; later frames
    // for the same id supersede earlier ones
    entry.events = frame.events;
}
