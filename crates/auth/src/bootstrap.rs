//! First-run bootstrap
//!
//! An empty store has no users, so nothing could ever log in. On first
//! open the server seeds an `admin` user (role `admin`, full wildcard
//! permission) with its credential and relationship entities in
//! `_system`. The password comes from `ENTITYDB_ADMIN_PASSWORD`,
//! defaulting to `admin`.

use crate::session::SessionStore;
use entitydb_core::{DbResult, EntityId};
use tracing::{info, warn};

/// Default admin username
pub const ADMIN_USERNAME: &str = "admin";

/// Environment variable carrying the bootstrap password
pub const ADMIN_PASSWORD_ENV: &str = "ENTITYDB_ADMIN_PASSWORD";

/// Seed the admin user if it does not exist yet
///
/// Returns the created user id, or `None` when the user already existed.
pub fn bootstrap_admin(sessions: &SessionStore, password: &str) -> DbResult<Option<EntityId>> {
    if sessions.find_user(ADMIN_USERNAME)?.is_some() {
        return Ok(None);
    }
    let id = sessions.create_user(ADMIN_USERNAME, password, &["admin"], &[("*", "*")])?;
    info!(target: "entitydb::auth", user = ADMIN_USERNAME, "bootstrap admin created");
    Ok(Some(id))
}

/// Resolve the bootstrap password from the environment
pub fn admin_password_from_env() -> String {
    match std::env::var(ADMIN_PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => {
            warn!(
                target: "entitydb::auth",
                "{} not set, using default admin password", ADMIN_PASSWORD_ENV
            );
            "admin".to_string()
        }
    }
}
