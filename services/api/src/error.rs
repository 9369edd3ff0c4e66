//! services/api/src/error.rs
//!
//! Defines the primary error type for the API service and how it is rendered
//! as an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clicker_core::EngineError;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Configuration could not be loaded at startup.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error returned by a session engine operation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was malformed before it reached the engine.
    #[error("{0}")]
    BadRequest(String),

    /// The caller could not be identified or lacks the admin token.
    #[error("{0}")]
    Unauthorized(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => (engine_status(e), e.kind()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
        EngineError::NotEnrolled(_) | EngineError::Forbidden => StatusCode::FORBIDDEN,
        EngineError::CodeConflict(_)
        | EngineError::SessionEnded(_)
        | EngineError::LateSubmission(_) => StatusCode::CONFLICT,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Renders every error as `{ "error": kind, "message": ..., "context": ... }`.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match &self {
            ApiError::Engine(EngineError::LateSubmission(_)) => {
                "This question is no longer accepting answers".to_string()
            }
            _ if status.is_server_error() => {
                error!("Request failed: {}", self);
                match status {
                    StatusCode::SERVICE_UNAVAILABLE => {
                        "The service is temporarily unavailable, please retry".to_string()
                    }
                    _ => "Internal Server Error".to_string(),
                }
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": kind,
            "message": message,
        });
        if let ApiError::Engine(e) = &self {
            if let Some(context) = e.access_context() {
                body["context"] = json!(context);
            }
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let cases = [
            (EngineError::NotFound("Session X".into()), StatusCode::NOT_FOUND),
            (EngineError::Forbidden, StatusCode::FORBIDDEN),
            (EngineError::LateSubmission(Uuid::nil()), StatusCode::CONFLICT),
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (EngineError::ServiceUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
