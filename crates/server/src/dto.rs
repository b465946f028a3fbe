//! Request/response shapes and boundary conversions
//!
//! ISO-8601 timestamps and base64 content exist only here; the engine
//! speaks nanosecond integers and raw bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use entitydb_core::{DbResult, Entity, EntityDbError, Polarity, Timestamp};
use entitydb_engine::{EntityChanges, ResolvedEvent, TagDiff};
use serde::{Deserialize, Serialize};

// =============================================================================
// Timestamps
// =============================================================================

/// Parse a timestamp parameter: ISO-8601 / RFC 3339, or raw nanoseconds
pub fn parse_timestamp(s: &str) -> DbResult<Timestamp> {
    if let Ok(nanos) = s.parse::<i64>() {
        return Ok(Timestamp::from_nanos(nanos));
    }
    let parsed: DateTime<Utc> = s
        .parse::<DateTime<Utc>>()
        .map_err(|e| EntityDbError::malformed(format!("bad timestamp '{}': {}", s, e)))?;
    let nanos = parsed
        .timestamp_nanos_opt()
        .ok_or_else(|| EntityDbError::malformed(format!("timestamp '{}' out of range", s)))?;
    Ok(Timestamp::from_nanos(nanos))
}

/// Format a timestamp as RFC 3339 with nanoseconds
pub fn format_timestamp(ts: Timestamp) -> String {
    Utc.timestamp_nanos(ts.as_nanos()).to_rfc3339()
}

// =============================================================================
// Auth
// =============================================================================

/// `POST /api/v1/auth/login` body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// The caller, as returned by login and whoami
#[derive(Debug, Serialize)]
pub struct UserDto {
    /// User entity id
    pub id: String,
    /// Username, when the entity carries one
    pub username: Option<String>,
    /// Role names
    pub roles: Vec<String>,
}

/// `POST /api/v1/auth/login` response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token
    pub token: String,
    /// ISO-8601 expiry
    pub expires_at: String,
    /// The authenticated user
    pub user: UserDto,
}

// =============================================================================
// Entities
// =============================================================================

/// `POST /api/v1/entities/create` body
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Tag values
    #[serde(default)]
    pub tags: Vec<String>,
    /// Base64 content
    pub content: Option<String>,
    /// Explicit id (rare; normally allocated by the engine)
    pub id: Option<String>,
}

/// `PUT /api/v1/entities/update` body
///
/// `tags`, when present, is the desired live tag set; the engine records
/// the add/remove transitions that reach it. `content`, when present,
/// replaces the entity's content.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    /// Target entity
    pub id: String,
    /// Desired live tag set
    pub tags: Option<Vec<String>>,
    /// Base64 replacement content
    pub content: Option<String>,
}

/// An entity crossing the wire
#[derive(Debug, Serialize)]
pub struct EntityDto {
    /// Entity id
    pub id: String,
    /// Tag values; wire form `"<nanos>|<tag>"` when timestamps were
    /// requested
    pub tags: Vec<String>,
    /// Base64 content, omitted when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// The entity's dataset
    pub dataset: String,
}

impl EntityDto {
    /// Convert an entity, optionally exposing per-tag timestamps
    pub fn from_entity(entity: &Entity, include_timestamps: bool) -> Self {
        let tags = entity
            .tags
            .iter()
            .map(|t| {
                if include_timestamps {
                    t.to_wire()
                } else {
                    t.value.as_str().to_string()
                }
            })
            .collect();
        EntityDto {
            id: entity.id.to_string(),
            dataset: entity.dataset().to_string(),
            tags,
            content: if entity.content.is_empty() {
                None
            } else {
                Some(BASE64.encode(&entity.content))
            },
        }
    }
}

/// Decode an optional base64 content field
pub fn decode_content(content: &Option<String>) -> DbResult<Vec<u8>> {
    match content {
        None => Ok(Vec::new()),
        Some(b64) => BASE64
            .decode(b64)
            .map_err(|e| EntityDbError::malformed(format!("content is not base64: {}", e))),
    }
}

// =============================================================================
// Temporal
// =============================================================================

/// One history event on the wire
#[derive(Debug, Serialize)]
pub struct EventDto {
    /// ISO-8601 timestamp
    pub timestamp: String,
    /// Raw nanoseconds for lossless clients
    pub nanos: i64,
    /// `"add"` or `"remove"`
    pub polarity: &'static str,
    /// The tag value
    pub tag: String,
}

impl From<&ResolvedEvent> for EventDto {
    fn from(e: &ResolvedEvent) -> Self {
        EventDto {
            timestamp: format_timestamp(e.ts),
            nanos: e.ts.as_nanos(),
            polarity: match e.polarity {
                Polarity::Add => "add",
                Polarity::Remove => "remove",
            },
            tag: e.value.as_str().to_string(),
        }
    }
}

/// `GET /api/v1/entities/changes` element
#[derive(Debug, Serialize)]
pub struct ChangesDto {
    /// The changed entity
    pub id: String,
    /// Its events after the cutoff
    pub events: Vec<EventDto>,
}

impl From<&EntityChanges> for ChangesDto {
    fn from(c: &EntityChanges) -> Self {
        ChangesDto {
            id: c.id.to_string(),
            events: c.events.iter().map(EventDto::from).collect(),
        }
    }
}

/// `GET /api/v1/entities/diff` response
#[derive(Debug, Serialize)]
pub struct DiffDto {
    /// Tags present at t2 but not t1
    pub added: Vec<String>,
    /// Tags present at t1 but not t2
    pub removed: Vec<String>,
}

impl From<&TagDiff> for DiffDto {
    fn from(d: &TagDiff) -> Self {
        DiffDto {
            added: d.added.iter().map(|t| t.as_str().to_string()).collect(),
            removed: d.removed.iter().map(|t| t.as_str().to_string()).collect(),
        }
    }
}

/// `GET /health` response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves
    pub status: &'static str,
    /// Seconds since the store opened
    pub uptime_s: u64,
    /// Live entity count
    pub entities: usize,
}
