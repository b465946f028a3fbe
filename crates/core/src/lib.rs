//! Core types for EntityDB
//!
//! This crate defines the foundational types used throughout the system:
//! - EntityId: 64-hex, time-prefixed entity identifiers
//! - Timestamp: nanosecond-precision timestamps
//! - TagValue / TagId: the tag grammar and interned tag ids
//! - TagEvent / TaggedAtTime: temporal tag events and their wire form
//! - Entity: the materialized record handed to callers
//! - EntityDbError: the unified error taxonomy
//! - CancelToken: cooperative request cancellation
//! - Limits: size limits and shard constants

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod limits;
pub mod tag;
pub mod timestamp;

pub use cancel::CancelToken;
pub use entity::Entity;
pub use error::{DbResult, EntityDbError};
pub use event::{Polarity, TagEvent, TaggedAtTime, EVENT_ENCODED_LEN};
pub use id::{EntityId, ID_BYTE_LEN, ID_HEX_LEN};
pub use tag::{TagId, TagValue, WildcardPattern, DEFAULT_DATASET, SYSTEM_DATASET};
pub use timestamp::Timestamp;
