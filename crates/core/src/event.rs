//! Tag events
//!
//! A tag event records one add or remove of a tag at a point in time.
//! Replaying an entity's events in timestamp order (ties broken by arrival
//! order) yields its tag set at any time T.
//!
//! # Encodings
//!
//! Storage form is 13 bytes little-endian: `ts:i64 | polarity:u8 | tag:u32`.
//! Wire form of a timestamped tag is the string `"<nanos>|<tag-value>"`.

use crate::error::{DbResult, EntityDbError};
use crate::tag::{TagId, TagValue};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Encoded size of a tag event in a record frame
pub const EVENT_ENCODED_LEN: usize = 13;

/// Whether an event adds or removes a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    /// The tag joins the live set
    Add,
    /// The tag leaves the live set
    Remove,
}

impl Polarity {
    /// Storage byte
    pub fn as_u8(self) -> u8 {
        match self {
            Polarity::Add => 0,
            Polarity::Remove => 1,
        }
    }

    /// Decode the storage byte
    pub fn from_u8(b: u8) -> DbResult<Self> {
        match b {
            0 => Ok(Polarity::Add),
            1 => Ok(Polarity::Remove),
            other => Err(EntityDbError::corruption(
                "event",
                format!("invalid polarity byte {}", other),
            )),
        }
    }
}

/// One add/remove of an interned tag at a point in time
///
/// Events are append-only; arrival order within an entity is positional
/// (the global LSN assigns the total order, and file position preserves it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagEvent {
    /// Origin timestamp
    pub ts: Timestamp,
    /// Add or remove
    pub polarity: Polarity,
    /// Interned tag id
    pub tag: TagId,
}

impl TagEvent {
    /// An add event
    pub fn add(ts: Timestamp, tag: TagId) -> Self {
        TagEvent {
            ts,
            polarity: Polarity::Add,
            tag,
        }
    }

    /// A remove event
    pub fn remove(ts: Timestamp, tag: TagId) -> Self {
        TagEvent {
            ts,
            polarity: Polarity::Remove,
            tag,
        }
    }

    /// Encode to the 13-byte storage form
    pub fn encode(&self) -> [u8; EVENT_ENCODED_LEN] {
        let mut out = [0u8; EVENT_ENCODED_LEN];
        out[0..8].copy_from_slice(&self.ts.as_nanos().to_le_bytes());
        out[8] = self.polarity.as_u8();
        out[9..13].copy_from_slice(&self.tag.0.to_le_bytes());
        out
    }

    /// Decode the 13-byte storage form
    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < EVENT_ENCODED_LEN {
            return Err(EntityDbError::corruption(
                "event",
                format!("truncated event: {} bytes", bytes.len()),
            ));
        }
        let ts = i64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let polarity = Polarity::from_u8(bytes[8])?;
        let tag = u32::from_le_bytes(bytes[9..13].try_into().expect("4 bytes"));
        Ok(TagEvent {
            ts: Timestamp::from_nanos(ts),
            polarity,
            tag: TagId(tag),
        })
    }
}

/// A tag value carrying its effective timestamp
///
/// This is the materialized view handed to callers: the live set of an
/// entity, or a point-in-time reconstruction, with each tag's effective
/// origin time. Wire form is `"<nanos>|<tag-value>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedAtTime {
    /// When the tag became effective
    pub ts: Timestamp,
    /// The resolved tag value
    pub value: TagValue,
}

impl TaggedAtTime {
    /// Format the wire form
    pub fn to_wire(&self) -> String {
        format!("{}|{}", self.ts.as_nanos(), self.value.as_str())
    }

    /// Parse the wire form
    pub fn from_wire(s: &str) -> DbResult<Self> {
        let (nanos, value) = s
            .split_once('|')
            .ok_or_else(|| EntityDbError::malformed(format!("wire tag '{}' missing |", s)))?;
        let nanos: i64 = nanos
            .parse()
            .map_err(|_| EntityDbError::malformed(format!("wire tag timestamp '{}'", nanos)))?;
        Ok(TaggedAtTime {
            ts: Timestamp::from_nanos(nanos),
            value: TagValue::parse(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode() {
        let ev = TagEvent::add(Timestamp::from_nanos(123_456_789), TagId(42));
        let bytes = ev.encode();
        assert_eq!(bytes.len(), EVENT_ENCODED_LEN);
        assert_eq!(TagEvent::decode(&bytes).unwrap(), ev);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let ev = TagEvent::remove(Timestamp::EPOCH, TagId(1));
        let bytes = ev.encode();
        assert!(TagEvent::decode(&bytes[..12]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_polarity() {
        let mut bytes = TagEvent::add(Timestamp::EPOCH, TagId(1)).encode();
        bytes[8] = 7;
        assert!(TagEvent::decode(&bytes).is_err());
    }

    #[test]
    fn test_wire_form() {
        let t = TaggedAtTime {
            ts: Timestamp::from_nanos(1000),
            value: TagValue::parse("status:draft").unwrap(),
        };
        assert_eq!(t.to_wire(), "1000|status:draft");
        assert_eq!(TaggedAtTime::from_wire("1000|status:draft").unwrap(), t);
    }

    #[test]
    fn test_wire_form_rejects_garbage() {
        assert!(TaggedAtTime::from_wire("no-pipe").is_err());
        assert!(TaggedAtTime::from_wire("abc|status:draft").is_err());
        assert!(TaggedAtTime::from_wire("12|no-namespace").is_err());
    }

    proptest! {
        #[test]
        fn prop_event_roundtrip(ts in any::<i64>(), add in any::<bool>(), tag in 1u32..u32::MAX) {
            let ev = TagEvent {
                ts: Timestamp::from_nanos(ts),
                polarity: if add { Polarity::Add } else { Polarity::Remove },
                tag: TagId(tag),
            };
            prop_assert_eq!(TagEvent::decode(&ev.encode()).unwrap(), ev);
        }

        #[test]
        fn prop_wire_roundtrip(nanos in any::<i64>(), rest in "[a-z]{1,8}:[a-z0-9]{1,16}") {
            let t = TaggedAtTime {
                ts: Timestamp::from_nanos(nanos),
                value: TagValue::parse(&rest).unwrap(),
            };
            prop_assert_eq!(TaggedAtTime::from_wire(&t.to_wire()).unwrap(), t);
        }
    }
}
