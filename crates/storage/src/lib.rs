//! On-disk storage for EntityDB
//!
//! This crate owns the unified file format and everything that touches it:
//! - the tag dictionary (string interning with snapshot readers)
//! - header, record-frame, and WAL-frame codecs
//! - the file handle (positioned reads, serialized appends, advisory lock)
//! - the id→offset map and checksummed record reads with quarantine
//! - WAL scanning for crash recovery
//! - whole-file compaction (write-new, rename, discard-old)
//!
//! The engine crate composes these into the write and read paths; nothing
//! here knows about indexes, datasets, or HTTP.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compaction;
pub mod dictionary;
pub mod durability;
pub mod file;
pub mod format;
pub mod offsets;
pub mod reader;
pub mod replay;

pub use compaction::write_compacted;
pub use dictionary::{DictSnapshot, TagDictionary};
pub use durability::{DurabilityMode, SyncPolicy, DEFAULT_GROUP_COMMIT_MS};
pub use file::{compact_temp_path, remove_stale_compact_temp, StoreFile};
pub use format::{
    FileHeader, FrameError, RecordFrame, WalFrame, WalOp, DEFAULT_DICT_CAPACITY,
    DEFAULT_WAL_CAPACITY, HEADER_SIZE,
};
pub use offsets::OffsetMap;
pub use reader::{scan_records, Quarantine, RecordReader, RecordScan};
pub use replay::{scan_wal, WalScan, WalStop};
