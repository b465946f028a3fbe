//! Error → HTTP status translation
//!
//! The single place that knows the mapping from engine error kinds to
//! status codes. No other layer knows about HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use entitydb_core::EntityDbError;
use serde::Serialize;

/// An engine error crossing the HTTP boundary
#[derive(Debug)]
pub struct ApiError(pub EntityDbError);

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn kind_str(e: &EntityDbError) -> &'static str {
    match e {
        EntityDbError::MalformedInput { .. } => "malformed_input",
        EntityDbError::NotFound { .. } => "not_found",
        EntityDbError::Unauthorized { .. } => "unauthorized",
        EntityDbError::Forbidden { .. } => "forbidden",
        EntityDbError::Conflict { .. } => "conflict",
        EntityDbError::PayloadTooLarge { .. } => "payload_too_large",
        EntityDbError::Backpressure { .. } => "backpressure",
        EntityDbError::Corruption { .. } => "corruption",
        EntityDbError::Io { .. } => "io",
        EntityDbError::Internal { .. } => "internal",
    }
}

fn status_for(e: &EntityDbError) -> StatusCode {
    match e {
        EntityDbError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
        EntityDbError::NotFound { .. } => StatusCode::NOT_FOUND,
        EntityDbError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        EntityDbError::Forbidden { .. } => StatusCode::FORBIDDEN,
        EntityDbError::Conflict { .. } => StatusCode::CONFLICT,
        EntityDbError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        EntityDbError::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
        EntityDbError::Corruption { .. }
        | EntityDbError::Io { .. }
        | EntityDbError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "entitydb::http", error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: kind_str(&self.0),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<EntityDbError> for ApiError {
    fn from(e: EntityDbError) -> Self {
        ApiError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&EntityDbError::malformed("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&EntityDbError::unauthorized("x")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&EntityDbError::forbidden("x")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&EntityDbError::not_found("x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&EntityDbError::conflict("x")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&EntityDbError::payload_too_large("x", 1, 2)),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&EntityDbError::backpressure("x")),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&EntityDbError::corruption("s", "x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_strings_match_taxonomy() {
        assert_eq!(kind_str(&EntityDbError::malformed("x")), "malformed_input");
        assert_eq!(kind_str(&EntityDbError::io("x")), "io");
        assert_eq!(kind_str(&EntityDbError::internal("x")), "internal");
    }
}
