//! EntityDB: a temporal, tag-oriented storage engine
//!
//! Every record is a triple `(id, multiset of tag events, opaque
//! content)`. Tags carry origin timestamps and the store never
//! overwrites history: reads can ask what an entity was at time T, how
//! it changed between T1 and T2, or what changed since T. Data is
//! isolated into named datasets, access is gated by tag-encoded RBAC,
//! and everything persists in one crash-consistent unified file.
//!
//! This crate is the facade: it re-exports the engine and auth layers
//! and hosts the end-to-end scenario tests. The HTTP server lives in
//! the `entitydb-server` binary.
//!
//! ```ignore
//! use entitydb::{EngineConfig, Store, TagValue};
//!
//! let store = Store::open(EngineConfig::load("./data")?)?;
//! let entity = store.create(
//!     vec![TagValue::parse("type:doc")?, TagValue::parse("status:draft")?],
//!     b"hello".to_vec(),
//!     None,
//! )?;
//! let draft = store.as_of(&entity.id, earlier)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use entitydb_auth::{
    bootstrap_admin, Permission, RbacGate, Session, SessionStore, UserContext,
};
pub use entitydb_core::{
    CancelToken, DbResult, Entity, EntityDbError, EntityId, Polarity, TagEvent, TagId, TagValue,
    TaggedAtTime, Timestamp, WildcardPattern, DEFAULT_DATASET, SYSTEM_DATASET,
};
pub use entitydb_engine::{
    CacheStats, CompactionReport, DurabilityMode, EngineConfig, EntityChanges, GetOptions,
    ListFilter, MatchMode, PressureLimits, PurgeOptions, RecoveryReport, ResolvedEvent, Store,
    StoreStats, TagDiff,
};
