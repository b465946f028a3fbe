//! Durability levels for WAL appends
//!
//! - `FsyncEach`: fsync after every WAL append — maximum durability
//! - `GroupCommit`: fsync batched every N milliseconds (default 10)
//! - `NoFsync`: explicit opt-in for tests; the OS flushes whenever

use entitydb_core::{DbResult, EntityDbError};
use parking_lot::Mutex;
use std::time::Instant;

/// Default group-commit window in milliseconds
pub const DEFAULT_GROUP_COMMIT_MS: u64 = 10;

/// When WAL appends reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after each WAL append
    FsyncEach,
    /// fsync at most once per window
    GroupCommit {
        /// Batch window in milliseconds
        interval_ms: u64,
    },
    /// Never fsync explicitly (test only)
    NoFsync,
}

impl DurabilityMode {
    /// Parse the `DURABILITY` setting: `fsync` | `group` | `none`
    pub fn parse(s: &str) -> DbResult<Self> {
        match s {
            "fsync" => Ok(DurabilityMode::FsyncEach),
            "group" => Ok(DurabilityMode::GroupCommit {
                interval_ms: DEFAULT_GROUP_COMMIT_MS,
            }),
            "none" => Ok(DurabilityMode::NoFsync),
            other => Err(EntityDbError::malformed(format!(
                "invalid durability '{}': expected fsync, group, or none",
                other
            ))),
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::GroupCommit {
            interval_ms: DEFAULT_GROUP_COMMIT_MS,
        }
    }
}

/// Tracks when the last fsync happened for group commit
#[derive(Debug)]
pub struct SyncPolicy {
    mode: DurabilityMode,
    last_sync: Mutex<Instant>,
}

impl SyncPolicy {
    /// Create a policy for the given mode
    pub fn new(mode: DurabilityMode) -> Self {
        SyncPolicy {
            mode,
            last_sync: Mutex::new(Instant::now()),
        }
    }

    /// The configured mode
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Whether an append should fsync now
    ///
    /// For group commit the window check and timer reset are atomic, so
    /// concurrent appenders elect exactly one syncer per window.
    pub fn should_sync(&self) -> bool {
        match self.mode {
            DurabilityMode::FsyncEach => true,
            DurabilityMode::NoFsync => false,
            DurabilityMode::GroupCommit { interval_ms } => {
                let mut last = self.last_sync.lock();
                if last.elapsed().as_millis() as u64 >= interval_ms {
                    *last = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reset the window after an explicit flush
    pub fn note_flush(&self) {
        *self.last_sync.lock() = Instant::now();
    }
}
