//! The materialized entity type
//!
//! Internally an entity is a record frame plus index state; this is the
//! resolved form handed to callers: id, live (or point-in-time) tag set
//! with effective timestamps, and content bytes.

use crate::event::TaggedAtTime;
use crate::id::EntityId;
use crate::tag::{TagValue, DEFAULT_DATASET};
use serde::{Deserialize, Serialize};

/// A materialized entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Immutable, globally unique id
    pub id: EntityId,
    /// Tag set in order of appearance in history (older first)
    pub tags: Vec<TaggedAtTime>,
    /// Content bytes (reassembled if chunked)
    pub content: Vec<u8>,
}

impl Entity {
    /// Check whether a tag value is in the set
    pub fn has_tag(&self, value: &TagValue) -> bool {
        self.tags.iter().any(|t| &t.value == value)
    }

    /// Iterate tag values only
    pub fn tag_values(&self) -> impl Iterator<Item = &TagValue> {
        self.tags.iter().map(|t| &t.value)
    }

    /// The entity's dataset
    ///
    /// The latest `dataset:` tag wins; a legacy `hub:` tag is honored as a
    /// read-only fallback; otherwise `default`.
    pub fn dataset(&self) -> &str {
        self.tags
            .iter()
            .rev()
            .find_map(|t| t.value.dataset_name())
            .or_else(|| self.tags.iter().rev().find_map(|t| t.value.hub_name()))
            .unwrap_or(DEFAULT_DATASET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn tagged(ts: i64, value: &str) -> TaggedAtTime {
        TaggedAtTime {
            ts: Timestamp::from_nanos(ts),
            value: TagValue::parse(value).unwrap(),
        }
    }

    fn entity(tags: Vec<TaggedAtTime>) -> Entity {
        Entity {
            id: EntityId::generate(Timestamp::now()),
            tags,
            content: Vec::new(),
        }
    }

    #[test]
    fn test_dataset_default() {
        let e = entity(vec![tagged(1, "type:doc")]);
        assert_eq!(e.dataset(), DEFAULT_DATASET);
    }

    #[test]
    fn test_dataset_latest_wins() {
        let e = entity(vec![tagged(1, "dataset:a"), tagged(2, "dataset:b")]);
        assert_eq!(e.dataset(), "b");
    }

    #[test]
    fn test_hub_is_fallback_only() {
        let e = entity(vec![tagged(1, "hub:legacy")]);
        assert_eq!(e.dataset(), "legacy");

        let e = entity(vec![tagged(2, "hub:legacy"), tagged(1, "dataset:cur")]);
        assert_eq!(e.dataset(), "cur");
    }

    #[test]
    fn test_has_tag() {
        let e = entity(vec![tagged(1, "type:doc")]);
        assert!(e.has_tag(&TagValue::parse("type:doc").unwrap()));
        assert!(!e.has_tag(&TagValue::parse("type:img").unwrap()));
    }
}
