//! The EntityDB engine
//!
//! Composes the storage and index crates into the temporal tag store:
//! - `Store`: create / append_tags / replace_content / get / list / query
//! - the temporal query engine: history, as_of, changes_since, diff
//! - dataset routing and the `_system` dataset
//! - startup recovery (record scan + WAL replay from `wal_off`)
//! - compaction with optional history purge
//! - background workers (index merge, group-commit flush, pressure)
//!
//! The engine is synchronous and usable without any network layer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod config;
pub mod dataset;
pub mod query;
pub mod recovery;
pub mod store;
pub mod temporal;

pub use background::IntervalWorker;
pub use config::{EngineConfig, CONFIG_FILE_NAME, STORE_FILE_NAME};
pub use entitydb_index::{CacheStats, PressureLimits};
pub use entitydb_storage::DurabilityMode;
pub use dataset::DatasetRouter;
pub use query::{GetOptions, ListFilter, MatchMode};
pub use recovery::RecoveryReport;
pub use store::{
    sha256_hex, CompactionReport, EngineWorkers, PurgeOptions, Store, StoreStats, CHUNK_SIZE,
};
pub use temporal::{EntityChanges, ResolvedEvent, TagDiff};
