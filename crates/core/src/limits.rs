//! Size limits for content, tags, and write batching
//!
//! Limits are enforced at the write path; exceeding them yields
//! `PayloadTooLarge`. The delta thresholds govern when accumulated tag
//! appends force a record rewrite.

/// Maximum content size per entity (4 GiB)
pub const MAX_CONTENT_LEN: u64 = 4 * 1024 * 1024 * 1024;

/// Content above this size is transparently chunked (4 MiB)
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Maximum number of tag events per entity
pub const MAX_TAG_EVENTS: usize = 64 * 1024;

/// Maximum byte length of a single tag value
pub const MAX_TAG_LEN: usize = 1024;

/// Accumulated append delta (bytes) that triggers a record rewrite
pub const DELTA_REWRITE_BYTES: usize = 16 * 1024;

/// Accumulated append delta (events) that triggers a record rewrite
pub const DELTA_REWRITE_EVENTS: usize = 64;

/// Number of shards for entity-keyed state (locks, indexes, timelines)
pub const SHARD_COUNT: usize = 256;

/// Per-entity cap on temporal events kept in RAM; older events are
/// demand-loaded from the record section
pub const TEMPORAL_RAM_CAP: usize = 1024;
