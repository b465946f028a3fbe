//! Authentication and authorization for EntityDB
//!
//! Everything here is stored as entities in the `_system` dataset: users
//! carry role and permission tags, credentials live on dedicated
//! entities linked by one-way relationship entities, and sessions are
//! entities whose id doubles as the bearer token.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod credential;
pub mod rbac;
pub mod session;

pub use bootstrap::{admin_password_from_env, bootstrap_admin, ADMIN_PASSWORD_ENV, ADMIN_USERNAME};
pub use credential::{credential_tag, hash_password, verify_password};
pub use rbac::{Permission, RbacGate, UserContext, ADMIN_ROLE};
pub use session::{Session, SessionStore, SESSION_TTL, SWEEP_INTERVAL};
