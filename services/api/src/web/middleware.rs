//! services/api/src/web/middleware.rs
//!
//! Request middleware: caller identification and the admin gate.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Header set by the upstream identity gateway for signed-in users.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The identity of whoever sent the request. Anonymous participants are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller(pub Option<Uuid>);

impl Caller {
    pub fn user_id(&self) -> Option<Uuid> {
        self.0
    }

    /// The caller's id, for operations that need a signed-in user.
    pub fn require(&self) -> Result<Uuid, ApiError> {
        self.0.ok_or_else(|| {
            ApiError::Unauthorized(format!("the {} header is required", USER_ID_HEADER))
        })
    }
}

/// Resolves the optional `x-user-id` header into a [`Caller`] extension.
///
/// A missing header yields an anonymous caller; a malformed one is rejected.
pub async fn resolve_caller(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let caller = match req.headers().get(USER_ID_HEADER) {
        None => Caller(None),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::BadRequest(format!("invalid {} header", USER_ID_HEADER)))?;
            let user_id = Uuid::parse_str(raw.trim())
                .map_err(|_| ApiError::BadRequest(format!("invalid {} format", USER_ID_HEADER)))?;
            Caller(Some(user_id))
        }
    };
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Admits only requests bearing the configured admin token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(ApiError::Unauthorized("the admin API is disabled".to_string()));
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        warn!("Rejected admin request with a missing or wrong token");
        return Err(ApiError::Unauthorized("invalid admin token".to_string()));
    }
    Ok(next.run(req).await)
}
