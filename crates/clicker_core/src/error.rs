//! crates/clicker_core/src/error.rs
//!
//! The error taxonomy returned by every engine operation.

use uuid::Uuid;

use crate::domain::{AccessContext, SessionCode};
use crate::ports::PortError;

/// Errors surfaced to callers of the engine.
///
/// A duplicate submission is deliberately absent: it is reported as a success
/// with `is_duplicate` set, see [`crate::responses::SubmitOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Sign in to join session {}", .0.session_code)]
    AuthRequired(AccessContext),

    #[error("You are not enrolled in the class for session {}", .0.session_code)]
    NotEnrolled(AccessContext),

    #[error("Only the session owner can do that")]
    Forbidden,

    #[error("Session code {0} is already in use by an active session")]
    CodeConflict(SessionCode),

    #[error("Session {0} has ended")]
    SessionEnded(SessionCode),

    #[error("Question {0} is no longer accepting responses")]
    LateSubmission(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl EngineError {
    /// A stable, machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AuthRequired(_) => "auth_required",
            EngineError::NotEnrolled(_) => "not_enrolled",
            EngineError::Forbidden => "forbidden",
            EngineError::CodeConflict(_) => "code_conflict",
            EngineError::SessionEnded(_) => "session_ended",
            EngineError::LateSubmission(_) => "late_submission",
            EngineError::Validation(_) => "validation_error",
            EngineError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    /// The remediation context for access errors.
    pub fn access_context(&self) -> Option<&AccessContext> {
        match self {
            EngineError::AuthRequired(ctx) | EngineError::NotEnrolled(ctx) => Some(ctx),
            _ => None,
        }
    }
}

impl From<PortError> for EngineError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => EngineError::NotFound(what),
            PortError::Conflict(msg) => {
                EngineError::ServiceUnavailable(format!("write conflict: {}", msg))
            }
            PortError::Unavailable(msg) | PortError::Unexpected(msg) => {
                EngineError::ServiceUnavailable(msg)
            }
        }
    }
}

/// A convenience type alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;
