//! Credential hashing
//!
//! Credentials are bcrypt hashes carried as `credential:bcrypt:<hash>`
//! tags on a dedicated credential entity (never on the user entity
//! itself). Verification failure and unknown user are indistinguishable
//! to callers.

use entitydb_core::{DbResult, EntityDbError, TagValue};

/// Tag prefix carrying a bcrypt hash
pub const CREDENTIAL_PREFIX: &str = "credential:bcrypt:";

/// Hash a password with the default bcrypt cost
pub fn hash_password(password: &str) -> DbResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| EntityDbError::internal(format!("bcrypt hash failed: {}", e)))
}

/// Verify a password against a stored hash
///
/// Malformed hashes verify as false rather than erroring; a corrupt
/// credential entity must not open the account.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// The `credential:bcrypt:<hash>` tag for a hash
pub fn credential_tag(hash: &str) -> DbResult<TagValue> {
    TagValue::parse(&format!("{}{}", CREDENTIAL_PREFIX, hash))
}

/// Extract the hash from a credential tag, if it is one
pub fn hash_from_tag(tag: &TagValue) -> Option<&str> {
    tag.as_str().strip_prefix(CREDENTIAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn test_garbage_hash_fails_closed() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_tag_roundtrip() {
        let hash = hash_password("pw").unwrap();
        let tag = credential_tag(&hash).unwrap();
        assert_eq!(hash_from_tag(&tag), Some(hash.as_str()));
        assert_eq!(
            hash_from_tag(&TagValue::parse("type:user").unwrap()),
            None
        );
    }
}
