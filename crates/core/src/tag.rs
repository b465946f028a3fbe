//! Tag values and the tag grammar
//!
//! Tags are namespaced strings of the form `<ns>:<rest>`. Well-known
//! namespaces drive engine behavior (datasets, RBAC, lifecycle, content
//! chunking); unknown namespaces are stored verbatim and searchable.

use crate::error::{DbResult, EntityDbError};
use crate::limits::MAX_TAG_LEN;
use serde::{Deserialize, Serialize};

/// Interned tag identifier
///
/// Assigned append-only by the tag dictionary for the lifetime of a file.
/// ID 0 is the reserved sentinel and is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub u32);

impl TagId {
    /// The reserved sentinel; never refers to a real tag
    pub const SENTINEL: TagId = TagId(0);
}

/// The dataset every entity belongs to when it carries no `dataset:` tag
pub const DEFAULT_DATASET: &str = "default";

/// The dataset holding users, sessions, and configuration
pub const SYSTEM_DATASET: &str = "_system";

/// A validated namespaced tag value
///
/// ```
/// use entitydb_core::TagValue;
///
/// let tag = TagValue::parse("status:draft").unwrap();
/// assert_eq!(tag.namespace(), "status");
/// assert_eq!(tag.rest(), "draft");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagValue(String);

impl TagValue {
    /// Parse and validate a tag value
    ///
    /// A tag must contain a `:` separating a non-empty namespace from the
    /// rest, must be at most [`MAX_TAG_LEN`] bytes, and must not contain
    /// control characters.
    pub fn parse(s: &str) -> DbResult<Self> {
        if s.len() > MAX_TAG_LEN {
            return Err(EntityDbError::payload_too_large(
                "tag value",
                MAX_TAG_LEN as u64,
                s.len() as u64,
            ));
        }
        let colon = s
            .find(':')
            .ok_or_else(|| EntityDbError::malformed(format!("tag '{}' has no namespace", s)))?;
        if colon == 0 {
            return Err(EntityDbError::malformed(format!(
                "tag '{}' has an empty namespace",
                s
            )));
        }
        if s.chars().any(|c| c.is_control()) {
            return Err(EntityDbError::malformed(
                "tag contains control characters".to_string(),
            ));
        }
        Ok(TagValue(s.to_string()))
    }

    /// The full string form
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace (text before the first `:`)
    pub fn namespace(&self) -> &str {
        &self.0[..self.0.find(':').unwrap_or(0)]
    }

    /// Everything after the first `:`
    pub fn rest(&self) -> &str {
        &self.0[self.0.find(':').map(|i| i + 1).unwrap_or(self.0.len())..]
    }

    // =========================================================================
    // Well-known tag constructors
    // =========================================================================

    /// `dataset:<name>`
    pub fn dataset(name: &str) -> Self {
        TagValue(format!("dataset:{}", name))
    }

    /// `hub:<name>` — legacy alias of `dataset:`, honored read-only
    pub fn hub(name: &str) -> Self {
        TagValue(format!("hub:{}", name))
    }

    /// `type:<name>`
    pub fn entity_type(name: &str) -> Self {
        TagValue(format!("type:{}", name))
    }

    /// `rbac:role:<role>`
    pub fn role(role: &str) -> Self {
        TagValue(format!("rbac:role:{}", role))
    }

    /// `rbac:perm:<verb>:<object>`
    pub fn perm(verb: &str, object: &str) -> Self {
        TagValue(format!("rbac:perm:{}:{}", verb, object))
    }

    /// `lifecycle:state:<state>`
    pub fn lifecycle(state: &str) -> Self {
        TagValue(format!("lifecycle:state:{}", state))
    }

    // =========================================================================
    // Well-known tag predicates and accessors
    // =========================================================================

    /// Dataset name if this is a `dataset:` tag
    pub fn dataset_name(&self) -> Option<&str> {
        self.0.strip_prefix("dataset:")
    }

    /// Dataset name if this is a legacy `hub:` tag
    pub fn hub_name(&self) -> Option<&str> {
        self.0.strip_prefix("hub:")
    }

    /// True for `rbac:perm:` tags
    pub fn is_perm(&self) -> bool {
        self.0.starts_with("rbac:perm:")
    }

    /// Role name if this is an `rbac:role:` tag
    pub fn role_name(&self) -> Option<&str> {
        self.0.strip_prefix("rbac:role:")
    }

    /// Lifecycle state if this is a `lifecycle:state:` tag
    pub fn lifecycle_state(&self) -> Option<&str> {
        self.0.strip_prefix("lifecycle:state:")
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `ns:prefix*` wildcard pattern
///
/// Matches every tag value starting with the prefix before the trailing
/// `*`. Evaluation iterates the dictionary's sorted index, so the prefix
/// must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    prefix: String,
}

impl WildcardPattern {
    /// Parse a wildcard pattern
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` if the pattern does not end in `*`, has an
    /// empty prefix, or contains `*` anywhere but the end.
    pub fn parse(s: &str) -> DbResult<Self> {
        let prefix = s
            .strip_suffix('*')
            .ok_or_else(|| EntityDbError::malformed(format!("wildcard '{}' must end in *", s)))?;
        if prefix.is_empty() {
            return Err(EntityDbError::malformed(
                "wildcard prefix cannot be empty".to_string(),
            ));
        }
        if prefix.contains('*') {
            return Err(EntityDbError::malformed(
                "wildcard * is only allowed at the end".to_string(),
            ));
        }
        Ok(WildcardPattern {
            prefix: prefix.to_string(),
        })
    }

    /// The literal prefix before the `*`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Check a tag value against the pattern
    pub fn matches(&self, value: &str) -> bool {
        value.starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_tags() {
        for s in [
            "type:doc",
            "dataset:metrics",
            "rbac:perm:read:entity",
            "content:chunk:3:of:abc",
            "custom-namespace:anything at all",
        ] {
            let tag = TagValue::parse(s).unwrap();
            assert_eq!(tag.as_str(), s);
        }
    }

    #[test]
    fn test_parse_rejects_bad_grammar() {
        assert!(TagValue::parse("no-namespace").is_err());
        assert!(TagValue::parse(":empty-ns").is_err());
        assert!(TagValue::parse("has:control\u{0007}char").is_err());
        assert!(TagValue::parse(&format!("ns:{}", "x".repeat(MAX_TAG_LEN))).is_err());
    }

    #[test]
    fn test_namespace_split() {
        let tag = TagValue::parse("rbac:perm:read:entity").unwrap();
        assert_eq!(tag.namespace(), "rbac");
        assert_eq!(tag.rest(), "perm:read:entity");
    }

    #[test]
    fn test_dataset_accessors() {
        assert_eq!(
            TagValue::dataset("a").dataset_name(),
            Some("a")
        );
        assert_eq!(TagValue::hub("legacy").hub_name(), Some("legacy"));
        assert_eq!(TagValue::hub("legacy").dataset_name(), None);
    }

    #[test]
    fn test_wildcard_parse_and_match() {
        let w = WildcardPattern::parse("status:*").unwrap();
        assert!(w.matches("status:draft"));
        assert!(w.matches("status:published"));
        assert!(!w.matches("type:doc"));

        assert!(WildcardPattern::parse("no-star").is_err());
        assert!(WildcardPattern::parse("*").is_err());
        assert!(WildcardPattern::parse("a*b*").is_err());
    }

    #[test]
    fn test_bcrypt_hashes_are_valid_tags() {
        // bcrypt hashes contain '$' and '.'
        let tag =
            TagValue::parse("credential:bcrypt:$2b$12$abcdefghijklmnopqrstuv").unwrap();
        assert_eq!(tag.namespace(), "credential");
    }
}
