//! Error types for EntityDB
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Malformed input**: bad request bodies, tag grammar violations, timestamp parses
//! - **Not found**: unknown entity ids, unknown session tokens
//! - **Auth**: missing/invalid token (`Unauthorized`), RBAC denial (`Forbidden`)
//! - **Conflict**: duplicate id on create, stale update
//! - **Resource**: payload over limits, backpressure under load
//! - **Storage**: CRC mismatch (`Corruption`), disk failures (`Io`)
//! - **Internal**: invariant violations; the request fails, the engine continues
//!
//! Every public operation returns [`DbResult`]. No error kind is silently
//! swallowed: `Corruption` and `Io` are surfaced to every caller and logged
//! once per distinct span; everything else is translated to the matching
//! HTTP status by the server layer.

use std::io;
use thiserror::Error;

/// Result type alias for EntityDB operations
pub type DbResult<T> = std::result::Result<T, EntityDbError>;

/// Unified error type for all EntityDB operations
///
/// ## Usage
///
/// ```ignore
/// match store.get(&id, &GetOptions::default()) {
///     Err(e) if e.is_not_found() => { /* 404 */ }
///     Err(e) if e.is_serious() => { /* log and alert */ }
///     Err(e) => { /* other errors */ }
///     Ok(entity) => { /* success */ }
/// }
/// ```
#[derive(Debug, Error)]
pub enum EntityDbError {
    /// Request body, tag grammar, or timestamp failed to parse
    #[error("malformed input: {message}")]
    MalformedInput {
        /// What was wrong with the input
        message: String,
    },

    /// Entity id or session token does not exist
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing thing (entity id, token, ...)
        what: String,
    },

    /// Missing or invalid session token
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Why authentication failed
        message: String,
    },

    /// RBAC denied the operation
    #[error("forbidden: {message}")]
    Forbidden {
        /// Which permission was missing
        message: String,
    },

    /// Duplicate id on create, or a stale update
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state
        message: String,
    },

    /// Content or tag count over the configured limits
    #[error("payload too large: {what} (limit: {limit}, requested: {requested})")]
    PayloadTooLarge {
        /// Which limit was exceeded
        what: String,
        /// The limit
        limit: u64,
        /// What was requested
        requested: u64,
    },

    /// Cache hard limit reached or WAL queue full
    #[error("backpressure: {resource}")]
    Backpressure {
        /// The saturated resource
        resource: String,
    },

    /// CRC mismatch on a record; the affected span is quarantined
    #[error("corruption in {span}: {message}")]
    Corruption {
        /// File span or component where corruption was detected
        span: String,
        /// Description of the corruption
        message: String,
    },

    /// Disk error; the engine enters read-only mode
    #[error("io error: {message}")]
    Io {
        /// Error message
        message: String,
        /// Underlying I/O error, when available
        #[source]
        source: Option<io::Error>,
    },

    /// Invariant violation; logged with enough state to reproduce
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl EntityDbError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a MalformedInput error
    pub fn malformed(message: impl Into<String>) -> Self {
        EntityDbError::MalformedInput {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        EntityDbError::NotFound { what: what.into() }
    }

    /// Create an Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        EntityDbError::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a Forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        EntityDbError::Forbidden {
            message: message.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        EntityDbError::Conflict {
            message: message.into(),
        }
    }

    /// Create a PayloadTooLarge error
    pub fn payload_too_large(what: impl Into<String>, limit: u64, requested: u64) -> Self {
        EntityDbError::PayloadTooLarge {
            what: what.into(),
            limit,
            requested,
        }
    }

    /// Create a Backpressure error
    pub fn backpressure(resource: impl Into<String>) -> Self {
        EntityDbError::Backpressure {
            resource: resource.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(span: impl Into<String>, message: impl Into<String>) -> Self {
        EntityDbError::Corruption {
            span: span.into(),
            message: message.into(),
        }
    }

    /// Create an Io error without a source
    pub fn io(message: impl Into<String>) -> Self {
        EntityDbError::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        EntityDbError::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, EntityDbError::NotFound { .. })
    }

    /// Check if this is an authentication or authorization failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            EntityDbError::Unauthorized { .. } | EntityDbError::Forbidden { .. }
        )
    }

    /// Check if this error may succeed on retry
    ///
    /// Backpressure clears when load drops; conflicts clear when the caller
    /// re-reads. Everything else requires the input or the disk to change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntityDbError::Backpressure { .. } | EntityDbError::Conflict { .. }
        )
    }

    /// Check if this is a serious error that warrants operator attention
    ///
    /// Corruption and io errors are surfaced to every caller; internal
    /// errors indicate a bug.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            EntityDbError::Corruption { .. }
                | EntityDbError::Io { .. }
                | EntityDbError::Internal { .. }
        )
    }
}

impl From<io::Error> for EntityDbError {
    fn from(e: io::Error) -> Self {
        EntityDbError::Io {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_malformed() {
        let e = EntityDbError::malformed("tag missing namespace");
        let msg = e.to_string();
        assert!(msg.contains("malformed input"));
        assert!(msg.contains("tag missing namespace"));
    }

    #[test]
    fn test_display_not_found() {
        let e = EntityDbError::not_found("entity abc");
        assert!(e.to_string().contains("not found"));
        assert!(e.is_not_found());
    }

    #[test]
    fn test_display_payload_too_large() {
        let e = EntityDbError::payload_too_large("content", 4096, 8192);
        let msg = e.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("8192"));
    }

    #[test]
    fn test_auth_classification() {
        assert!(EntityDbError::unauthorized("no token").is_auth_error());
        assert!(EntityDbError::forbidden("missing perm").is_auth_error());
        assert!(!EntityDbError::not_found("x").is_auth_error());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EntityDbError::backpressure("wal queue").is_retryable());
        assert!(EntityDbError::conflict("duplicate id").is_retryable());
        assert!(!EntityDbError::corruption("records", "crc").is_retryable());
        assert!(!EntityDbError::malformed("bad").is_retryable());
    }

    #[test]
    fn test_serious_classification() {
        assert!(EntityDbError::corruption("records@4096", "crc mismatch").is_serious());
        assert!(EntityDbError::io("disk gone").is_serious());
        assert!(EntityDbError::internal("bug").is_serious());
        assert!(!EntityDbError::unauthorized("no token").is_serious());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let e: EntityDbError = io_err.into();
        assert!(matches!(e, EntityDbError::Io { source: Some(_), .. }));
        assert!(e.is_serious());
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> DbResult<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
