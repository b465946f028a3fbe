//! The unified file format
//!
//! One file holds everything: a fixed 4 KiB header, a reserved write-ahead
//! log region, the tag dictionary section, and the entity record section.
//! All integers are little-endian.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Header (4 KiB, crc-protected)        │
//! ├──────────────────────────────────────┤ wal_off
//! │ WAL region (fixed reservation)       │
//! ├──────────────────────────────────────┤ dict_off
//! │ Dictionary region (fixed reservation)│
//! ├──────────────────────────────────────┤ records_off
//! │ Record frames (append-only)          │
//! └──────────────────────────────────────┘
//! ```
//!
//! The header stores every section offset explicitly, so replay never has
//! to guess where the WAL starts: recovery always seeks to `wal_off`.
//! The dictionary section is rewritten only during compaction (which
//! produces a fresh file); tags interned since then are recoverable from
//! the WAL frames that introduced them, which the WAL retains until the
//! next compaction resets it.

pub mod record;
pub mod wal;

pub use record::RecordFrame;
pub use wal::{WalFrame, WalOp};

use crc32fast::Hasher;
use thiserror::Error;

/// Magic bytes identifying a unified file: "EDB3"
pub const MAGIC: [u8; 4] = *b"EDB3";

/// Current file format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of the header in bytes (zero-padded)
pub const HEADER_SIZE: usize = 4096;

/// Header flag: dictionary section is present and current
pub const FLAG_DICT_PRESENT: u32 = 1 << 0;

/// Header flag: record content is compressed (reserved, never set)
pub const FLAG_COMPRESSION: u32 = 1 << 1;

/// Default WAL region reservation (16 MiB)
pub const DEFAULT_WAL_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default dictionary region reservation (4 MiB)
pub const DEFAULT_DICT_CAPACITY: u64 = 4 * 1024 * 1024;

/// Errors from decoding frames and sections
///
/// `InsufficientData` marks a partial tail (expected after a crash);
/// `ChecksumMismatch` marks corruption worth scanning past.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes for a complete frame
    #[error("insufficient data for frame")]
    InsufficientData,

    /// CRC32 check failed
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the frame
        expected: u32,
        /// CRC computed over the payload
        actual: u32,
    },

    /// CRC was valid but the payload could not be parsed
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Compute a CRC32 over a set of byte slices
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// The 4 KiB file header
///
/// `last_clean` is the nanosecond timestamp of the last clean shutdown;
/// zero means the file was not closed cleanly and WAL replay is required.
/// `header_crc32` covers bytes `[0, 68)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version
    pub version: u32,
    /// Flag bits (`FLAG_DICT_PRESENT`, `FLAG_COMPRESSION`)
    pub flags: u32,
    /// Start of the WAL region
    pub wal_off: u64,
    /// WAL bytes used at last header flush (high-water mark)
    pub wal_len: u64,
    /// Start of the dictionary section (0 when absent)
    pub dict_off: u64,
    /// Length of the dictionary section
    pub dict_len: u64,
    /// Start of the record section
    pub records_off: u64,
    /// Length of the record section at last header flush
    pub records_len: u64,
    /// Nanos of last clean shutdown; 0 after a crash
    pub last_clean: u64,
}

impl FileHeader {
    /// Header for a freshly created file with the given region reservations
    pub fn new(wal_capacity: u64, dict_capacity: u64) -> Self {
        FileHeader {
            version: FORMAT_VERSION,
            flags: 0,
            wal_off: HEADER_SIZE as u64,
            wal_len: 0,
            dict_off: HEADER_SIZE as u64 + wal_capacity,
            dict_len: 0,
            records_off: HEADER_SIZE as u64 + wal_capacity + dict_capacity,
            records_len: 0,
            last_clean: 0,
        }
    }

    /// Bytes reserved for the WAL region
    pub fn wal_capacity(&self) -> u64 {
        self.dict_off - self.wal_off
    }

    /// Bytes reserved for the dictionary region
    pub fn dict_capacity(&self) -> u64 {
        self.records_off - self.dict_off
    }

    /// Whether the dictionary section is present and current
    pub fn dict_present(&self) -> bool {
        self.flags & FLAG_DICT_PRESENT != 0 && self.dict_len > 0
    }

    /// Serialize to the 4 KiB on-disk form
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.flags.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.wal_off.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.wal_len.to_le_bytes());
        bytes[28..36].copy_from_slice(&self.dict_off.to_le_bytes());
        bytes[36..44].copy_from_slice(&self.dict_len.to_le_bytes());
        bytes[44..52].copy_from_slice(&self.records_off.to_le_bytes());
        bytes[52..60].copy_from_slice(&self.records_len.to_le_bytes());
        bytes[60..68].copy_from_slice(&self.last_clean.to_le_bytes());
        let crc = crc32(&[&bytes[0..68]]);
        bytes[68..72].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Deserialize and validate the on-disk form
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::InsufficientData);
        }
        if bytes[0..4] != MAGIC {
            return Err(FrameError::Malformed(format!(
                "bad magic {:02x?}",
                &bytes[0..4]
            )));
        }
        let stored_crc = u32::from_le_bytes(bytes[68..72].try_into().expect("4 bytes"));
        let actual_crc = crc32(&[&bytes[0..68]]);
        if stored_crc != actual_crc {
            return Err(FrameError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
        if version != FORMAT_VERSION {
            return Err(FrameError::Malformed(format!(
                "unsupported format version {}",
                version
            )));
        }
        Ok(FileHeader {
            version,
            flags: u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")),
            wal_off: u64::from_le_bytes(bytes[12..20].try_into().expect("8 bytes")),
            wal_len: u64::from_le_bytes(bytes[20..28].try_into().expect("8 bytes")),
            dict_off: u64::from_le_bytes(bytes[28..36].try_into().expect("8 bytes")),
            dict_len: u64::from_le_bytes(bytes[36..44].try_into().expect("8 bytes")),
            records_off: u64::from_le_bytes(bytes[44..52].try_into().expect("8 bytes")),
            records_len: u64::from_le_bytes(bytes[52..60].try_into().expect("8 bytes")),
            last_clean: u64::from_le_bytes(bytes[60..68].try_into().expect("8 bytes")),
        })
    }
}
