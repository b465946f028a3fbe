//! Entity record frames
//!
//! A record frame carries one entity: its id, full tag event history, and
//! content bytes. Frames are append-only; superseded frames stay in place
//! (they serve point-in-time content reads) and are dropped at compaction.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────┬──────────┬─────────────┬────────┬─────────────┬────────────┬─────────────┬─────────┐
//! │ len (4)  │ crc32 (4)│ tombstone(1)│ id (32)│ tag_count(4)│ events 13×n│ content_len │ content │
//! └──────────┴──────────┴─────────────┴────────┴─────────────┴────────────┴─────────────┴─────────┘
//! ```
//!
//! `len` counts every byte after the len field. The CRC covers everything
//! after the CRC field.

use super::{crc32, FrameError};
use entitydb_core::{EntityId, TagEvent, EVENT_ENCODED_LEN, ID_BYTE_LEN};

/// Fixed bytes before the events array: crc + tombstone + id + tag_count
const FRAME_FIXED: usize = 4 + 1 + ID_BYTE_LEN + 4;

/// A decoded entity record frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    /// Superseded marker; live appends always write 0 and redirect the
    /// id→offset map instead of mutating frames in place
    pub tombstone: bool,
    /// The entity id
    pub id: EntityId,
    /// Full tag event history, arrival order
    pub events: Vec<TagEvent>,
    /// Content bytes
    pub content: Vec<u8>,
}

impl RecordFrame {
    /// Build a live frame
    pub fn new(id: EntityId, events: Vec<TagEvent>, content: Vec<u8>) -> Self {
        RecordFrame {
            tombstone: false,
            id,
            events,
            content,
        }
    }

    /// Encoded size in bytes, including the len field
    pub fn encoded_len(&self) -> usize {
        4 + FRAME_FIXED + self.events.len() * EVENT_ENCODED_LEN + 4 + self.content.len()
    }

    /// Serialize to the on-disk form
    pub fn encode(&self) -> Vec<u8> {
        let body_len = FRAME_FIXED + self.events.len() * EVENT_ENCODED_LEN + 4 + self.content.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());

        // Payload after the crc field, hashed then spliced in
        let mut payload = Vec::with_capacity(body_len - 4);
        payload.push(self.tombstone as u8);
        payload.extend_from_slice(&self.id.to_bytes());
        payload.extend_from_slice(&(self.events.len() as u32).to_le_bytes());
        for ev in &self.events {
            payload.extend_from_slice(&ev.encode());
        }
        payload.extend_from_slice(&(self.content.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.content);

        out.extend_from_slice(&crc32(&[&payload]).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Deserialize from a byte slice
    ///
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(RecordFrame, usize), FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::InsufficientData);
        }
        let body_len = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes")) as usize;
        if body_len < FRAME_FIXED + 4 {
            return Err(FrameError::Malformed(format!(
                "record body too short: {}",
                body_len
            )));
        }
        if bytes.len() < 4 + body_len {
            return Err(FrameError::InsufficientData);
        }
        let body = &bytes[4..4 + body_len];

        let stored_crc = u32::from_le_bytes(body[0..4].try_into().expect("4 bytes"));
        let payload = &body[4..];
        let actual_crc = crc32(&[payload]);
        if stored_crc != actual_crc {
            return Err(FrameError::ChecksumMismatch {
                expected: stored_crc,
                actual: actual_crc,
            });
        }

        let tombstone = match payload[0] {
            0 => false,
            1 => true,
            other => {
                return Err(FrameError::Malformed(format!(
                    "invalid tombstone byte {}",
                    other
                )))
            }
        };
        let id_bytes: [u8; ID_BYTE_LEN] = payload[1..1 + ID_BYTE_LEN]
            .try_into()
            .expect("32 bytes");
        let id = EntityId::from_bytes(&id_bytes);

        let mut pos = 1 + ID_BYTE_LEN;
        let tag_count =
            u32::from_le_bytes(payload[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        pos += 4;

        let events_len = tag_count
            .checked_mul(EVENT_ENCODED_LEN)
            .ok_or_else(|| FrameError::Malformed("tag_count overflow".to_string()))?;
        if payload.len() < pos + events_len + 4 {
            return Err(FrameError::Malformed(format!(
                "tag_count {} exceeds frame body",
                tag_count
            )));
        }

        let mut events = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            let ev = TagEvent::decode(&payload[pos..pos + EVENT_ENCODED_LEN])
                .map_err(|e| FrameError::Malformed(e.to_string()))?;
            events.push(ev);
            pos += EVENT_ENCODED_LEN;
        }

        let content_len =
            u32::from_le_bytes(payload[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        pos += 4;
        if payload.len() != pos + content_len {
            return Err(FrameError::Malformed(format!(
                "content_len {} disagrees with frame body",
                content_len
            )));
        }
        let content = payload[pos..].to_vec();

        Ok((
            RecordFrame {
                tombstone,
                id,
                events,
                content,
            },
            4 + body_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::{TagId, Timestamp};

    fn sample() -> RecordFrame {
        RecordFrame::new(
            EntityId::generate(Timestamp::from_nanos(1_000)),
            vec![
                TagEvent::add(Timestamp::from_nanos(1_000), TagId(1)),
                TagEvent::add(Timestamp::from_nanos(1_000), TagId(2)),
                TagEvent::remove(Timestamp::from_nanos(2_000), TagId(1)),
            ],
            b"hello world".to_vec(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let frame = sample();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), frame.encoded_len());
        let (decoded, consumed) = RecordFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_roundtrip_empty_content_and_events() {
        let frame = RecordFrame::new(
            EntityId::generate(Timestamp::now()),
            Vec::new(),
            Vec::new(),
        );
        let (decoded, _) = RecordFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_stops_at_partial_frame() {
        let bytes = sample().encode();
        assert_eq!(
            RecordFrame::decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::InsufficientData)
        );
        assert_eq!(RecordFrame::decode(&bytes[..2]), Err(FrameError::InsufficientData));
    }

    #[test]
    fn test_decode_detects_flipped_content_bit() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            RecordFrame::decode(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_trailing_bytes_ignored() {
        let frame = sample();
        let mut bytes = frame.encode();
        bytes.extend_from_slice(b"next frame here");
        let (decoded, consumed) = RecordFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(consumed, frame.encoded_len());
    }
}
