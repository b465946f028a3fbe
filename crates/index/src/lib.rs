//! In-memory indexes for EntityDB
//!
//! Everything here is derived state rebuilt from the record section on
//! cold start:
//! - the sharded tag index with per-shard bloom filters
//! - the temporal index (per-entity event vectors + content versions)
//! - the bounded entity cache
//! - the memory pressure monitor that keeps the caches honest

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bloom;
pub mod cache;
pub mod pressure;
pub mod tag_index;
pub mod temporal;

pub use bloom::BloomFilter;
pub use cache::{CacheStats, EntityCache, DEFAULT_CACHE_CAPACITY};
pub use pressure::{sample_rss_bytes, PressureLimits, PressureMonitor, SAMPLE_INTERVAL};
pub use tag_index::{TagIndex, MERGE_BUFFER_CAP, MERGE_INTERVAL_MS};
pub use temporal::{EntityTimeline, TemporalIndex};
