//! Tag dictionary: interning tag strings to 32-bit ids
//!
//! Tag-id assignments are append-only for the lifetime of a file; id 0 is
//! the reserved sentinel. A single writer allocates behind a mutex;
//! readers load an immutable `Arc<DictSnapshot>` that is swapped wholesale
//! whenever the dictionary grows, so lookups never contend with interning.
//! A bounded LRU caches hot string→id lookups, and a sorted secondary
//! index serves `ns:prefix*` wildcard scans.
//!
//! The dictionary is a section of the unified file, rewritten only at
//! compaction and clean shutdown; interns since then are recovered from
//! the WAL frames that introduced them.

use crate::format::{crc32, FrameError};
use entitydb_core::{DbResult, EntityDbError, TagId};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default capacity of the string→id reverse cache
pub const DEFAULT_REVERSE_CACHE_CAP: usize = 8192;

/// Immutable read view of the dictionary
///
/// Cheap to clone under the hood: values are `Arc<str>`, so a snapshot
/// rebuild is pointer bumps, not string copies.
#[derive(Debug, Default)]
pub struct DictSnapshot {
    /// Tag values, index `i` holds the value for `TagId(i + 1)`
    values: Vec<Arc<str>>,
    /// Exact value → id
    by_value: FxHashMap<Arc<str>, TagId>,
    /// Sorted value → id, for wildcard prefix scans
    sorted: BTreeMap<Arc<str>, TagId>,
}

impl DictSnapshot {
    /// Resolve an id to its string
    pub fn lookup(&self, id: TagId) -> Option<Arc<str>> {
        if id == TagId::SENTINEL {
            return None;
        }
        self.values.get(id.0 as usize - 1).cloned()
    }

    /// Resolve a string to its id
    pub fn lookup_id(&self, value: &str) -> Option<TagId> {
        self.by_value.get(value).copied()
    }

    /// All `(id, value)` pairs whose value starts with `prefix`, in value order
    pub fn prefix_scan(&self, prefix: &str) -> Vec<(TagId, Arc<str>)> {
        self.sorted
            .range(Arc::<str>::from(prefix)..)
            .take_while(|(v, _)| v.starts_with(prefix))
            .map(|(v, id)| (*id, v.clone()))
            .collect()
    }

    /// Number of interned tags
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The tag dictionary
pub struct TagDictionary {
    writer: Mutex<()>,
    snapshot: RwLock<Arc<DictSnapshot>>,
    reverse_cache: Mutex<LruCache<String, TagId>>,
}

impl TagDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_REVERSE_CACHE_CAP)
    }

    /// Create an empty dictionary with a custom reverse-cache bound
    pub fn with_cache_capacity(cap: usize) -> Self {
        TagDictionary {
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(DictSnapshot::default())),
            reverse_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cap.max(1)).expect("nonzero cache capacity"),
            )),
        }
    }

    /// Current read snapshot
    pub fn snapshot(&self) -> Arc<DictSnapshot> {
        self.snapshot.read().clone()
    }

    /// Intern a tag string, allocating a fresh id if new
    pub fn intern(&self, value: &str) -> DbResult<TagId> {
        if let Some(id) = self.reverse_cache.lock().get(value) {
            return Ok(*id);
        }
        if let Some(id) = self.snapshot().lookup_id(value) {
            self.reverse_cache.lock().put(value.to_string(), id);
            return Ok(id);
        }

        let _guard = self.writer.lock();
        // Double-check under the writer lock; another thread may have won
        let current = self.snapshot();
        if let Some(id) = current.lookup_id(value) {
            return Ok(id);
        }
        let id = self.allocate(&current, None, value)?;
        self.reverse_cache.lock().put(value.to_string(), id);
        Ok(id)
    }

    /// Re-intern a tag with a known id during WAL replay
    ///
    /// Ids are append-only (invariant I3): the id must either already map
    /// to the same value, or be exactly the next id to allocate.
    pub fn intern_existing(&self, id: TagId, value: &str) -> DbResult<()> {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        if let Some(existing) = current.lookup(id) {
            if &*existing == value {
                return Ok(());
            }
            return Err(EntityDbError::corruption(
                "dictionary",
                format!(
                    "tag id {} maps to '{}' but wal replays '{}'",
                    id.0, existing, value
                ),
            ));
        }
        let next = TagId(current.len() as u32 + 1);
        if id != next {
            return Err(EntityDbError::corruption(
                "dictionary",
                format!("wal interns tag id {} but next id is {}", id.0, next.0),
            ));
        }
        self.allocate(&current, Some(id), value)?;
        Ok(())
    }

    /// Resolve an id to its string
    pub fn lookup(&self, id: TagId) -> Option<Arc<str>> {
        self.snapshot.read().lookup(id)
    }

    /// Resolve a string to its id without allocating
    pub fn lookup_id(&self, value: &str) -> Option<TagId> {
        if let Some(id) = self.reverse_cache.lock().get(value) {
            return Some(*id);
        }
        self.snapshot.read().lookup_id(value)
    }

    /// Number of interned tags
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// True when nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Allocate under the writer guard and publish a fresh snapshot
    fn allocate(
        &self,
        current: &DictSnapshot,
        forced_id: Option<TagId>,
        value: &str,
    ) -> DbResult<TagId> {
        let next = current.len() as u64 + 1;
        if next > u32::MAX as u64 {
            return Err(EntityDbError::internal("tag dictionary is full"));
        }
        let id = forced_id.unwrap_or(TagId(next as u32));

        let shared: Arc<str> = Arc::from(value);
        let mut values = current.values.clone();
        values.push(shared.clone());
        let mut by_value = current.by_value.clone();
        by_value.insert(shared.clone(), id);
        let mut sorted = current.sorted.clone();
        sorted.insert(shared, id);

        *self.snapshot.write() = Arc::new(DictSnapshot {
            values,
            by_value,
            sorted,
        });
        Ok(id)
    }

    // =========================================================================
    // Section serialization
    // =========================================================================

    /// Serialize the dictionary section: `count:u32 | {id:u32|len:u16|bytes}× | crc32`
    pub fn encode(&self) -> Vec<u8> {
        let snapshot = self.snapshot();
        let mut out = Vec::new();
        out.extend_from_slice(&(snapshot.len() as u32).to_le_bytes());
        for (i, value) in snapshot.values.iter().enumerate() {
            out.extend_from_slice(&((i as u32) + 1).to_le_bytes());
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        let crc = crc32(&[&out]);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Deserialize a dictionary section
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 8 {
            return Err(FrameError::InsufficientData);
        }
        let body = &bytes[..bytes.len() - 4];
        let stored_crc =
            u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().expect("4 bytes"));
        let actual_crc = crc32(&[body]);
        if stored_crc != actual_crc {
            return Err(FrameError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        let count = u32::from_le_bytes(body[0..4].try_into().expect("4 bytes")) as usize;
        let mut pos = 4;
        let mut values: Vec<Arc<str>> = Vec::with_capacity(count);
        for expected in 1..=count as u32 {
            if body.len() < pos + 6 {
                return Err(FrameError::Malformed("truncated dictionary entry".into()));
            }
            let id = u32::from_le_bytes(body[pos..pos + 4].try_into().expect("4 bytes"));
            if id != expected {
                return Err(FrameError::Malformed(format!(
                    "dictionary ids not sequential: got {}, want {}",
                    id, expected
                )));
            }
            let len =
                u16::from_le_bytes(body[pos + 4..pos + 6].try_into().expect("2 bytes")) as usize;
            pos += 6;
            if body.len() < pos + len {
                return Err(FrameError::Malformed("truncated dictionary value".into()));
            }
            let value = std::str::from_utf8(&body[pos..pos + len])
                .map_err(|_| FrameError::Malformed("dictionary value not utf-8".into()))?;
            values.push(Arc::from(value));
            pos += len;
        }
        if pos != body.len() {
            return Err(FrameError::Malformed(
                "dictionary section has trailing bytes".into(),
            ));
        }

        let mut by_value = FxHashMap::default();
        let mut sorted = BTreeMap::new();
        for (i, v) in values.iter().enumerate() {
            let id = TagId(i as u32 + 1);
            by_value.insert(v.clone(), id);
            sorted.insert(v.clone(), id);
        }

        let dict = TagDictionary::new();
        *dict.snapshot.write() = Arc::new(DictSnapshot {
            values,
            by_value,
            sorted,
        });
        Ok(dict)
    }
}

impl Default for TagDictionary {
    fn default() -> Self {
        Self::new()
    }
}
