//! Entity identifiers
//!
//! An entity id is a 64-character lowercase-hex string. The first 16
//! characters encode the creation timestamp in nanoseconds; the remaining
//! 48 are random. Lexicographic order of generated ids therefore equals
//! creation-time order, and the binary form is exactly 32 bytes, which is
//! what the record frame stores.

use crate::error::{DbResult, EntityDbError};
use crate::timestamp::Timestamp;
use rand::RngCore;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Length of an entity id in hex characters
pub const ID_HEX_LEN: usize = 64;

/// Length of an entity id in raw bytes
pub const ID_BYTE_LEN: usize = 32;

/// A 64-character hex, time-prefixed entity identifier
///
/// Immutable and globally unique. The id doubles as the session token for
/// session entities, so the 192 random bits matter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh id with the given creation timestamp
    pub fn generate(ts: Timestamp) -> Self {
        let mut random = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut random);

        let mut s = String::with_capacity(ID_HEX_LEN);
        s.push_str(&format!("{:016x}", ts.as_nanos() as u64));
        for b in random {
            s.push_str(&format!("{:02x}", b));
        }
        EntityId(s)
    }

    /// Parse and validate an id from a string
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` for wrong length or non-hex characters.
    pub fn parse(s: &str) -> DbResult<Self> {
        if s.len() != ID_HEX_LEN {
            return Err(EntityDbError::malformed(format!(
                "entity id must be {} hex chars, got {}",
                ID_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(EntityDbError::malformed(
                "entity id must be lowercase hex".to_string(),
            ));
        }
        Ok(EntityId(s.to_string()))
    }

    /// The string form
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 32-byte binary form stored in record frames
    pub fn to_bytes(&self) -> [u8; ID_BYTE_LEN] {
        let mut out = [0u8; ID_BYTE_LEN];
        for (i, chunk) in self.0.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            out[i] = (hi << 4) | lo;
        }
        out
    }

    /// Decode the 32-byte binary form
    pub fn from_bytes(bytes: &[u8; ID_BYTE_LEN]) -> Self {
        let mut s = String::with_capacity(ID_HEX_LEN);
        for b in bytes {
            s.push_str(&format!("{:02x}", b));
        }
        EntityId(s)
    }

    /// Creation timestamp encoded in the id prefix
    pub fn created_at(&self) -> Timestamp {
        let nanos = u64::from_str_radix(&self.0[..16], 16).unwrap_or(0);
        Timestamp::from_nanos(nanos as i64)
    }

    /// Stable shard selector in `0..shard_count`
    pub fn shard(&self, shard_count: usize) -> usize {
        let mut hasher = FxHasher::default();
        self.0.hash(&mut hasher);
        (hasher.finish() as usize) % shard_count
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
