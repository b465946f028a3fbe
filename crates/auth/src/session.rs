//! The session store
//!
//! Sessions are entities in the `_system` dataset tagged `type:session`,
//! `identity:user:<id>`, and `session:expires:<nanos>`. The session
//! token IS the session entity's id (64 hex chars, 192 random bits).
//! Expiry is checked lazily on use and swept by a background worker;
//! logout appends `lifecycle:state:revoked` — history is never erased.

use crate::credential::{credential_tag, hash_from_tag, hash_password, verify_password};
use crate::rbac::UserContext;
use entitydb_core::{
    CancelToken, DbResult, Entity, EntityDbError, EntityId, TagValue, Timestamp, SYSTEM_DATASET,
};
use entitydb_engine::{GetOptions, ListFilter, MatchMode, Store};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default session lifetime
pub const SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Cadence of the background expiry sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Tag prefix carrying a session's expiry in nanoseconds
const EXPIRES_PREFIX: &str = "session:expires:";

/// A freshly created session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// The bearer token (the session entity id)
    pub token: String,
    /// When the session expires
    pub expires_at: Timestamp,
    /// The authenticated user
    pub user: UserContext,
}

/// Token → user resolution backed by the entity store
pub struct SessionStore {
    store: Arc<Store>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a session store over an engine
    pub fn new(store: Arc<Store>) -> Self {
        SessionStore {
            store,
            ttl: SESSION_TTL,
        }
    }

    /// Override the session TTL (tests)
    pub fn with_ttl(store: Arc<Store>, ttl: Duration) -> Self {
        SessionStore { store, ttl }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Verify a credential and mint a session
    ///
    /// Unknown user, missing credential, and wrong password are all the
    /// same `unauthorized` to the caller.
    pub fn login(&self, username: &str, password: &str) -> DbResult<Session> {
        let invalid = || EntityDbError::unauthorized("invalid credentials");

        let user = self.find_user(username)?.ok_or_else(invalid)?;
        let hash = self.credential_hash_for(&user.id)?.ok_or_else(invalid)?;
        if !verify_password(password, &hash) {
            return Err(invalid());
        }

        let now = Timestamp::now();
        let expires_at = now.saturating_add(self.ttl);
        let session = self.store.create(
            vec![
                TagValue::entity_type("session"),
                TagValue::parse(&format!("identity:user:{}", user.id))?,
                TagValue::parse(&format!("{}{}", EXPIRES_PREFIX, expires_at.as_nanos()))?,
                TagValue::dataset(SYSTEM_DATASET),
            ],
            Vec::new(),
            None,
        )?;

        let ctx = UserContext::from_tags(user.id.clone(), &user.tags);
        info!(
            target: "entitydb::auth",
            user = %ctx.username.as_deref().unwrap_or("?"),
            "session created"
        );
        Ok(Session {
            token: session.id.to_string(),
            expires_at,
            user: ctx,
        })
    }

    /// Resolve a bearer token to its user context
    ///
    /// Revoked, expired, and unknown tokens are all `unauthorized`.
    /// Expiry is lazy: an expired session is revoked on first use.
    pub fn validate(&self, token: &str) -> DbResult<UserContext> {
        let session = self.session_entity(token)?;
        let now = Timestamp::now();

        if let Some(state) = session
            .tags
            .iter()
            .rev()
            .find_map(|t| t.value.lifecycle_state())
        {
            if state == "revoked" || state == "expired" {
                return Err(EntityDbError::unauthorized("session revoked"));
            }
        }

        let expires = session_expiry(&session)
            .ok_or_else(|| EntityDbError::unauthorized("session missing expiry"))?;
        if expires <= now {
            // Lazy expiry: record the transition, then reject
            let _ = self
                .store
                .append_tags(&session.id, &[TagValue::lifecycle("expired")], &[]);
            return Err(EntityDbError::unauthorized("session expired"));
        }

        let user_id = session
            .tags
            .iter()
            .find_map(|t| t.value.as_str().strip_prefix("identity:user:"))
            .ok_or_else(|| EntityDbError::unauthorized("session missing user"))?;
        let user_id = EntityId::parse(user_id)
            .map_err(|_| EntityDbError::unauthorized("session user id malformed"))?;
        let user = self
            .store
            .get(&user_id, &GetOptions::default())
            .map_err(|_| EntityDbError::unauthorized("session user missing"))?;
        Ok(UserContext::from_tags(user_id, &user.tags))
    }

    /// Revoke a session
    pub fn logout(&self, token: &str) -> DbResult<()> {
        let session = self.session_entity(token)?;
        self.store
            .append_tags(&session.id, &[TagValue::lifecycle("revoked")], &[])?;
        Ok(())
    }

    /// Sweep expired sessions that were never used again
    ///
    /// Returns how many sessions were transitioned.
    pub fn sweep(&self) -> DbResult<usize> {
        let now = Timestamp::now();
        let sessions = self.store.list(
            &ListFilter {
                tags: vec![TagValue::entity_type("session")],
                match_mode: MatchMode::All,
                dataset: Some(SYSTEM_DATASET.to_string()),
                ..Default::default()
            },
            &CancelToken::new(),
        )?;

        let mut swept = 0;
        for session in sessions {
            let dead = session
                .tags
                .iter()
                .rev()
                .find_map(|t| t.value.lifecycle_state())
                .map(|s| s == "revoked" || s == "expired")
                .unwrap_or(false);
            if dead {
                continue;
            }
            match session_expiry(&session) {
                Some(expires) if expires <= now => {
                    self.store
                        .append_tags(&session.id, &[TagValue::lifecycle("expired")], &[])?;
                    swept += 1;
                }
                _ => {}
            }
        }
        if swept > 0 {
            debug!(target: "entitydb::auth", swept, "expired sessions swept");
        }
        Ok(swept)
    }

    // =========================================================================
    // User directory
    // =========================================================================

    /// Create a user with a credential entity and the one-way
    /// relationship entity linking them
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        roles: &[&str],
        perms: &[(&str, &str)],
    ) -> DbResult<EntityId> {
        if self.find_user(username)?.is_some() {
            return Err(EntityDbError::conflict(format!(
                "user '{}' already exists",
                username
            )));
        }

        let mut user_tags = vec![
            TagValue::entity_type("user"),
            TagValue::parse(&format!("identity:username:{}", username))?,
            TagValue::dataset(SYSTEM_DATASET),
        ];
        for role in roles {
            user_tags.push(TagValue::role(role));
        }
        for (verb, object) in perms {
            user_tags.push(TagValue::perm(verb, object));
        }
        let user = self.store.create(user_tags, Vec::new(), None)?;

        let hash = hash_password(password)?;
        let credential = self.store.create(
            vec![
                TagValue::entity_type("credential"),
                credential_tag(&hash)?,
                TagValue::dataset(SYSTEM_DATASET),
            ],
            Vec::new(),
            None,
        )?;

        self.store.create(
            vec![
                TagValue::entity_type("relationship"),
                TagValue::parse("relation:has_credential")?,
                TagValue::parse(&format!("from:{}", user.id))?,
                TagValue::parse(&format!("to:{}", credential.id))?,
                TagValue::dataset(SYSTEM_DATASET),
            ],
            Vec::new(),
            None,
        )?;

        Ok(user.id)
    }

    /// Look up a user entity by username
    pub fn find_user(&self, username: &str) -> DbResult<Option<Entity>> {
        let mut found = self.store.list(
            &ListFilter {
                tags: vec![
                    TagValue::entity_type("user"),
                    TagValue::parse(&format!("identity:username:{}", username))?,
                ],
                match_mode: MatchMode::All,
                dataset: Some(SYSTEM_DATASET.to_string()),
                limit: Some(1),
                ..Default::default()
            },
            &CancelToken::new(),
        )?;
        Ok(found.pop())
    }

    // Walk the relationship entity to the credential hash
    fn credential_hash_for(&self, user_id: &EntityId) -> DbResult<Option<String>> {
        let relationships = self.store.list(
            &ListFilter {
                tags: vec![
                    TagValue::entity_type("relationship"),
                    TagValue::parse("relation:has_credential")?,
                    TagValue::parse(&format!("from:{}", user_id))?,
                ],
                match_mode: MatchMode::All,
                dataset: Some(SYSTEM_DATASET.to_string()),
                limit: Some(1),
                ..Default::default()
            },
            &CancelToken::new(),
        )?;
        let Some(relationship) = relationships.first() else {
            return Ok(None);
        };
        let Some(credential_id) = relationship
            .tags
            .iter()
            .find_map(|t| t.value.as_str().strip_prefix("to:"))
        else {
            return Ok(None);
        };
        let credential_id = EntityId::parse(credential_id)?;
        let credential = self.store.get(&credential_id, &GetOptions::default())?;
        Ok(credential
            .tags
            .iter()
            .find_map(|t| hash_from_tag(&t.value))
            .map(|s| s.to_string()))
    }

    fn session_entity(&self, token: &str) -> DbResult<Entity> {
        let id = EntityId::parse(token)
            .map_err(|_| EntityDbError::unauthorized("malformed token"))?;
        let session = self
            .store
            .get(&id, &GetOptions::default())
            .map_err(|_| EntityDbError::unauthorized("unknown token"))?;
        if !session.has_tag(&TagValue::entity_type("session")) {
            return Err(EntityDbError::unauthorized("token is not a session"));
        }
        Ok(session)
    }
}

fn session_expiry(session: &Entity) -> Option<Timestamp> {
    session
        .tags
        .iter()
        .rev()
        .find_map(|t| t.value.as_str().strip_prefix(EXPIRES_PREFIX))
        .and_then(|nanos| nanos.parse::<i64>().ok())
        .map(Timestamp::from_nanos)
}
