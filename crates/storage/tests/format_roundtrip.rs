//! Property tests for the on-disk codecs
//!
//! Arbitrary frames must round-trip byte-exactly, and any single flipped
//! bit must be caught by a checksum.

use entitydb_core::{EntityId, Polarity, TagEvent, TagId, Timestamp};
use entitydb_storage::format::wal::{decode_payload, encode_payload};
use entitydb_storage::{FrameError, RecordFrame, WalFrame, WalOp};
use proptest::prelude::*;

fn arb_event() -> impl Strategy<Value = TagEvent> {
    (any::<i64>(), any::<bool>(), 1u32..u32::MAX).prop_map(|(ts, add, tag)| TagEvent {
        ts: Timestamp::from_nanos(ts),
        polarity: if add { Polarity::Add } else { Polarity::Remove },
        tag: TagId(tag),
    })
}

fn arb_record() -> impl Strategy<Value = RecordFrame> {
    (
        any::<i64>(),
        prop::collection::vec(arb_event(), 0..32),
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(seed, events, content)| {
            RecordFrame::new(
                EntityId::generate(Timestamp::from_nanos(seed)),
                events,
                content,
            )
        })
}

fn arb_wal_op() -> impl Strategy<Value = WalOp> {
    prop_oneof![
        Just(WalOp::Create),
        Just(WalOp::AppendTag),
        Just(WalOp::ReplaceContent),
        Just(WalOp::CompactMark),
    ]
}

proptest! {
    #[test]
    fn prop_record_frame_roundtrip(frame in arb_record()) {
        let bytes = frame.encode();
        prop_assert_eq!(bytes.len(), frame.encoded_len());
        let (decoded, consumed) = RecordFrame::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, frame);
        prop_assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn prop_record_frame_detects_any_flipped_bit(frame in arb_record(), flip in any::<prop::sample::Index>()) {
        let mut bytes = frame.encode();
        let pos = flip.index(bytes.len());
        bytes[pos] ^= 0x01;
        // Whatever byte was damaged, decoding must not hand back the
        // original frame as valid
        match RecordFrame::decode(&bytes) {
            Ok((decoded, _)) => prop_assert_ne!(decoded, frame),
            Err(_) => {}
        }
    }

    #[test]
    fn prop_wal_frame_roundtrip(lsn in 1u64.., op in arb_wal_op(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let frame = WalFrame::new(lsn, op, payload);
        let bytes = frame.encode();
        let (decoded, consumed) = WalFrame::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, frame);
        prop_assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn prop_wal_frame_rejects_corruption(lsn in 1u64.., payload in prop::collection::vec(any::<u8>(), 1..128), flip in any::<prop::sample::Index>()) {
        let frame = WalFrame::new(lsn, WalOp::Create, payload);
        let mut bytes = frame.encode();
        // Flip inside the hashed region (everything before the trailing crc)
        let pos = flip.index(bytes.len() - 4);
        bytes[pos] ^= 0xFF;
        let rejected = matches!(
            WalFrame::decode(&bytes),
            Err(FrameError::ChecksumMismatch { .. }) | Err(FrameError::InsufficientData) | Err(FrameError::Malformed(_))
        );
        prop_assert!(rejected);
    }

    #[test]
    fn prop_tag_prelude_roundtrip(tags in prop::collection::vec((1u32.., "[a-z]{1,6}:[a-z0-9]{1,12}"), 0..8), body in prop::collection::vec(any::<u8>(), 0..64)) {
        let tags: Vec<(TagId, String)> = tags.into_iter().map(|(id, v)| (TagId(id), v)).collect();
        let payload = encode_payload(&tags, &body);
        let (decoded, rest) = decode_payload(&payload).unwrap();
        prop_assert_eq!(decoded, tags);
        prop_assert_eq!(rest, body.as_slice());
    }
}
