//! The RBAC gate
//!
//! The caller's user entity carries `rbac:role:<role>` and
//! `rbac:perm:<verb>:<object>` tags. The gate evaluates the requested
//! operation against that set by exact match or wildcard
//! (`rbac:perm:*:*` grants everything; the `admin` role implies it).
//! Denial is `forbidden`; a missing or invalid token is `unauthorized`
//! and never reaches the gate. The gate runs after parsing and before
//! any index mutation.

use entitydb_core::{DbResult, EntityDbError, EntityId, TaggedAtTime};
use serde::Serialize;

/// The role that implies every permission
pub const ADMIN_ROLE: &str = "admin";

/// One parsed `rbac:perm:<verb>:<object>` grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    /// Operation verb, `*` for any
    pub verb: String,
    /// Target object, `*` for any
    pub object: String,
}

impl Permission {
    /// Build a permission
    pub fn new(verb: impl Into<String>, object: impl Into<String>) -> Self {
        Permission {
            verb: verb.into(),
            object: object.into(),
        }
    }

    /// Parse a tag value if it is an `rbac:perm:` tag
    pub fn from_tag(tag: &TaggedAtTime) -> Option<Self> {
        let rest = tag.value.as_str().strip_prefix("rbac:perm:")?;
        let (verb, object) = rest.split_once(':')?;
        Some(Permission::new(verb, object))
    }

    /// Whether this grant covers a requested verb/object
    pub fn grants(&self, verb: &str, object: &str) -> bool {
        (self.verb == "*" || self.verb == verb) && (self.object == "*" || self.object == object)
    }
}

/// The authenticated caller, derived from the user entity's tag set
#[derive(Debug, Clone, Serialize)]
pub struct UserContext {
    /// The user entity id
    pub user_id: EntityId,
    /// `identity:username:` value, if present
    pub username: Option<String>,
    /// Role names from `rbac:role:` tags
    pub roles: Vec<String>,
    /// Parsed permission grants
    pub perms: Vec<Permission>,
}

impl UserContext {
    /// Derive a context from a user entity's tags
    pub fn from_tags(user_id: EntityId, tags: &[TaggedAtTime]) -> Self {
        let username = tags
            .iter()
            .find_map(|t| t.value.as_str().strip_prefix("identity:username:"))
            .map(|s| s.to_string());
        let roles = tags
            .iter()
            .filter_map(|t| t.value.role_name())
            .map(|s| s.to_string())
            .collect();
        let perms = tags.iter().filter_map(Permission::from_tag).collect();
        UserContext {
            user_id,
            username,
            roles,
            perms,
        }
    }

    /// Whether the caller holds the admin role or the full wildcard
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE) || self.can("*", "*")
    }

    /// Whether any grant covers the verb/object
    pub fn can(&self, verb: &str, object: &str) -> bool {
        self.perms.iter().any(|p| p.grants(verb, object))
    }
}

/// Evaluates operations against a caller's grants
#[derive(Debug, Clone, Copy, Default)]
pub struct RbacGate;

impl RbacGate {
    /// Require a permission; admin passes everything
    pub fn require(&self, ctx: &UserContext, verb: &str, object: &str) -> DbResult<()> {
        if ctx.is_admin() || ctx.can(verb, object) {
            return Ok(());
        }
        Err(EntityDbError::forbidden(format!(
            "missing rbac:perm:{}:{}",
            verb, object
        )))
    }

    /// Require the admin role (system dataset, purge)
    pub fn require_admin(&self, ctx: &UserContext) -> DbResult<()> {
        if ctx.is_admin() {
            return Ok(());
        }
        Err(EntityDbError::forbidden("admin role required"))
    }
}
