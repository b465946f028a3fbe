//! Request cancellation tokens
//!
//! Every request carries a token; long list/query operations check it
//! between shards and between 1024-record batches. WAL appends are not
//! cancellable once initiated.

use crate::error::{DbResult, EntityDbError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a request and the engine
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check the flag
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `Internal` if cancelled; call sites sit between shards
    /// and between record batches
    pub fn check(&self) -> DbResult<()> {
        if self.is_cancelled() {
            Err(EntityDbError::internal("request cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_passes() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        assert!(t.check().is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let t = CancelToken::new();
        let clone = t.clone();
        t.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check().is_err());
    }
}
