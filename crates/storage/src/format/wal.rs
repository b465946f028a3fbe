//! Write-ahead log frames
//!
//! Every mutation appends a WAL frame before touching the record section.
//! Frames are self-delimiting and CRC-protected so recovery can scan the
//! WAL region from `wal_off` and stop at the first partial or invalid
//! frame.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────┬────────┬────────────────┬─────────┬──────────┐
//! │ lsn (8)  │ op (1) │ payload_len (4)│ payload │ crc32 (4)│
//! └──────────┴────────┴────────────────┴─────────┴──────────┘
//! ```
//!
//! The CRC covers lsn, op, payload_len, and payload.
//!
//! # Payloads
//!
//! Each mutating payload begins with the tag strings newly interned by the
//! operation (`count:u16 | { id:u32 | len:u16 | utf8 }×`), so replay can
//! rebuild dictionary growth since the last compaction. The remainder is:
//!
//! - `create` / `replace_content`: the full record frame bytes
//! - `append_tag`: `id:32B | event:13B`
//! - `compact_mark`: empty

use super::{crc32, FrameError};
use entitydb_core::{EntityId, TagEvent, TagId, EVENT_ENCODED_LEN, ID_BYTE_LEN};

/// Fixed frame overhead: lsn + op + payload_len + crc
pub const WAL_FRAME_OVERHEAD: usize = 8 + 1 + 4 + 4;

/// WAL operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    /// A new entity record
    Create = 1,
    /// A single tag event appended to an existing entity
    AppendTag = 2,
    /// A full record rewrite (content replacement or delta flush)
    ReplaceContent = 3,
    /// Breadcrumb written when compaction starts
    CompactMark = 4,
}

impl WalOp {
    fn from_u8(b: u8) -> Result<Self, FrameError> {
        match b {
            1 => Ok(WalOp::Create),
            2 => Ok(WalOp::AppendTag),
            3 => Ok(WalOp::ReplaceContent),
            4 => Ok(WalOp::CompactMark),
            other => Err(FrameError::Malformed(format!("unknown wal op {}", other))),
        }
    }
}

/// A decoded WAL frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFrame {
    /// Monotonic log sequence number
    pub lsn: u64,
    /// Operation code
    pub op: WalOp,
    /// Opaque payload; see module docs for per-op encoding
    pub payload: Vec<u8>,
}

impl WalFrame {
    /// Build a frame
    pub fn new(lsn: u64, op: WalOp, payload: Vec<u8>) -> Self {
        WalFrame { lsn, op, payload }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        WAL_FRAME_OVERHEAD + self.payload.len()
    }

    /// Serialize to the on-disk form
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.push(self.op as u8);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc32(&[&out]);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Deserialize from a byte slice
    ///
    /// Returns the frame and the number of bytes consumed. An all-zero
    /// prefix decodes as `InsufficientData` (the WAL region is zero-filled
    /// past the high-water mark).
    pub fn decode(bytes: &[u8]) -> Result<(WalFrame, usize), FrameError> {
        if bytes.len() < WAL_FRAME_OVERHEAD {
            return Err(FrameError::InsufficientData);
        }
        // Zero-filled tail: lsn 0 never occurs (the counter starts at 1)
        if bytes[..WAL_FRAME_OVERHEAD - 4].iter().all(|&b| b == 0) {
            return Err(FrameError::InsufficientData);
        }

        let payload_len =
            u32::from_le_bytes(bytes[9..13].try_into().expect("4 bytes")) as usize;
        let total = WAL_FRAME_OVERHEAD + payload_len;
        if bytes.len() < total {
            return Err(FrameError::InsufficientData);
        }

        let hashed = &bytes[..13 + payload_len];
        let stored_crc =
            u32::from_le_bytes(bytes[13 + payload_len..total].try_into().expect("4 bytes"));
        let actual_crc = crc32(&[hashed]);
        if stored_crc != actual_crc {
            return Err(FrameError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        let lsn = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let op = WalOp::from_u8(bytes[8])?;
        Ok((
            WalFrame {
                lsn,
                op,
                payload: bytes[13..13 + payload_len].to_vec(),
            },
            total,
        ))
    }
}

// =============================================================================
// Payload helpers
// =============================================================================

/// Newly interned `(id, value)` pairs carried by a mutating frame
pub type NewTags = Vec<(TagId, String)>;

/// Encode the new-tags prelude followed by the op body
pub fn encode_payload(new_tags: &[(TagId, String)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(new_tags.len() as u16).to_le_bytes());
    for (id, value) in new_tags {
        out.extend_from_slice(&id.0.to_le_bytes());
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Decode the new-tags prelude; returns the pairs and the op body
pub fn decode_payload(payload: &[u8]) -> Result<(NewTags, &[u8]), FrameError> {
    if payload.len() < 2 {
        return Err(FrameError::Malformed("payload missing tag prelude".into()));
    }
    let count = u16::from_le_bytes(payload[0..2].try_into().expect("2 bytes")) as usize;
    let mut pos = 2;
    let mut tags = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.len() < pos + 6 {
            return Err(FrameError::Malformed("truncated tag prelude".into()));
        }
        let id = u32::from_le_bytes(payload[pos..pos + 4].try_into().expect("4 bytes"));
        let len =
            u16::from_le_bytes(payload[pos + 4..pos + 6].try_into().expect("2 bytes")) as usize;
        pos += 6;
        if payload.len() < pos + len {
            return Err(FrameError::Malformed("truncated tag value".into()));
        }
        let value = std::str::from_utf8(&payload[pos..pos + len])
            .map_err(|_| FrameError::Malformed("tag value is not utf-8".into()))?
            .to_string();
        tags.push((TagId(id), value));
        pos += len;
    }
    Ok((tags, &payload[pos..]))
}

/// Encode an `append_tag` body: `id:32B | event:13B`
pub fn encode_append_body(id: &EntityId, event: &TagEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(ID_BYTE_LEN + EVENT_ENCODED_LEN);
    out.extend_from_slice(&id.to_bytes());
    out.extend_from_slice(&event.encode());
    out
}

/// Decode an `append_tag` body
pub fn decode_append_body(body: &[u8]) -> Result<(EntityId, TagEvent), FrameError> {
    if body.len() != ID_BYTE_LEN + EVENT_ENCODED_LEN {
        return Err(FrameError::Malformed(format!(
            "append_tag body length {}",
            body.len()
        )));
    }
    let id_bytes: [u8; ID_BYTE_LEN] = body[..ID_BYTE_LEN].try_into().expect("32 bytes");
    let event = TagEvent::decode(&body[ID_BYTE_LEN..])
        .map_err(|e| FrameError::Malformed(e.to_string()))?;
    Ok((EntityId::from_bytes(&id_bytes), event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::Timestamp;

    #[test]
    fn test_frame_roundtrip() {
        let frame = WalFrame::new(42, WalOp::Create, b"record bytes".to_vec());
        let bytes = frame.encode();
        let (decoded, consumed) = WalFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_frame_detects_corruption() {
        let mut bytes = WalFrame::new(7, WalOp::AppendTag, vec![1, 2, 3]).encode();
        bytes[14] ^= 0xFF;
        assert!(matches!(
            WalFrame::decode(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_partial_tail() {
        let bytes = WalFrame::new(7, WalOp::CompactMark, Vec::new()).encode();
        assert_eq!(
            WalFrame::decode(&bytes[..bytes.len() - 2]),
            Err(FrameError::InsufficientData)
        );
    }

    #[test]
    fn test_zero_fill_reads_as_end_of_wal() {
        let zeros = [0u8; 64];
        assert_eq!(WalFrame::decode(&zeros), Err(FrameError::InsufficientData));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let mut frame = WalFrame::new(1, WalOp::Create, Vec::new());
        frame.op = WalOp::Create;
        let mut bytes = frame.encode();
        bytes[8] = 99;
        // Fix the crc so only the op is wrong
        let crc = crc32(&[&bytes[..13]]);
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            WalFrame::decode(&bytes),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_payload_prelude_roundtrip() {
        let tags = vec![
            (TagId(5), "type:doc".to_string()),
            (TagId(6), "status:draft".to_string()),
        ];
        let payload = encode_payload(&tags, b"body");
        let (decoded, body) = decode_payload(&payload).unwrap();
        assert_eq!(decoded, tags);
        assert_eq!(body, b"body");
    }

    #[test]
    fn test_empty_prelude() {
        let payload = encode_payload(&[], b"x");
        let (tags, body) = decode_payload(&payload).unwrap();
        assert!(tags.is_empty());
        assert_eq!(body, b"x");
    }

    #[test]
    fn test_append_body_roundtrip() {
        let id = EntityId::generate(Timestamp::now());
        let ev = TagEvent::add(Timestamp::from_nanos(5), TagId(9));
        let body = encode_append_body(&id, &ev);
        let (decoded_id, decoded_ev) = decode_append_body(&body).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_ev, ev);
    }
}
