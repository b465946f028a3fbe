//! Shared handler state and bearer-token authentication

use crate::error::ApiError;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use entitydb_auth::{RbacGate, SessionStore, UserContext};
use entitydb_core::EntityDbError;
use entitydb_engine::Store;
use std::sync::Arc;
use std::time::Instant;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// The engine
    pub store: Arc<Store>,
    /// Token resolution
    pub sessions: Arc<SessionStore>,
    /// Permission evaluation
    pub gate: RbacGate,
    /// Process start, for `/health` uptime
    pub started: Instant,
}

impl AppState {
    /// Build the shared state
    pub fn new(store: Arc<Store>, sessions: Arc<SessionStore>) -> Self {
        AppState {
            store,
            sessions,
            gate: RbacGate,
            started: Instant::now(),
        }
    }

    /// Resolve the `Authorization: Bearer` header to a user context
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<UserContext, ApiError> {
        let token = bearer_token(headers)
            .ok_or_else(|| ApiError(EntityDbError::unauthorized("missing bearer token")))?;
        Ok(self.sessions.validate(token)?)
    }

    /// The raw bearer token, for logout
    pub fn raw_token<'a>(&self, headers: &'a HeaderMap) -> Result<&'a str, ApiError> {
        bearer_token(headers)
            .ok_or_else(|| ApiError(EntityDbError::unauthorized("missing bearer token")))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
