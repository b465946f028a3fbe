//! WAL scanning for crash recovery
//!
//! Replay always seeks to `wal_off` from the header — never file offset 0.
//! The region is scanned frame by frame until the first partial or invalid
//! frame; the zero-filled tail past the high-water mark reads as end of
//! data. Applying the frames is the engine's job (it owns the indexes);
//! this module only produces them in LSN order.

use crate::file::StoreFile;
use crate::format::{FrameError, WalFrame};
use entitydb_core::DbResult;
use tracing::warn;

/// Why the WAL scan stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalStop {
    /// Clean end: zero fill or exact end of region
    EndOfData,
    /// A frame ran past the valid bytes (torn write at the tail)
    PartialFrame,
    /// A frame failed its checksum at this WAL-relative offset
    ChecksumMismatch {
        /// Offset relative to `wal_off`
        offset: u64,
    },
}

/// Result of scanning the WAL region
#[derive(Debug)]
pub struct WalScan {
    /// Decoded frames in LSN order
    pub frames: Vec<WalFrame>,
    /// Bytes of valid frames (the new in-memory `wal_used`)
    pub valid_len: u64,
    /// Why the scan stopped
    pub stop: WalStop,
}

impl WalScan {
    /// Highest LSN seen, or 0 for an empty WAL
    pub fn last_lsn(&self) -> u64 {
        self.frames.last().map(|f| f.lsn).unwrap_or(0)
    }
}

/// Scan the WAL region from `wal_off`
///
/// A torn frame at the tail is expected after a crash and is simply cut
/// off: committed LSNs form a prefix, never a partially applied frame.
pub fn scan_wal(file: &StoreFile) -> DbResult<WalScan> {
    let header = file.header();
    // A crash can truncate the file inside the WAL region; scan what is
    // actually on disk
    let available = file
        .len()?
        .saturating_sub(header.wal_off)
        .min(header.wal_capacity()) as usize;
    let mut buffer = vec![0u8; available];
    if available > 0 {
        file.read_exact_at(&mut buffer, header.wal_off)?;
    }

    let mut frames = Vec::new();
    let mut offset = 0usize;
    let mut stop = WalStop::EndOfData;

    while offset < buffer.len() {
        match WalFrame::decode(&buffer[offset..]) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                offset += consumed;
            }
            Err(FrameError::InsufficientData) => {
                // Either the zero tail or a torn final frame; both end replay
                if buffer[offset..].iter().any(|&b| b != 0) {
                    stop = WalStop::PartialFrame;
                }
                break;
            }
            Err(e) => {
                warn!(
                    target: "entitydb::recovery",
                    offset,
                    error = %e,
                    "wal scan stopped at invalid frame"
                );
                stop = WalStop::ChecksumMismatch {
                    offset: offset as u64,
                };
                break;
            }
        }
    }

    Ok(WalScan {
        frames,
        valid_len: offset as u64,
        stop,
    })
}
