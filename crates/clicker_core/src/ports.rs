//! crates/clicker_core/src/ports.rs
//!
//! Defines the service contracts (traits) the engine consumes. Storage, the
//! roster service and the achievement catalog live outside the core; the
//! engine only ever talks to them through these ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AchievementDefinition, ClassSummary, Progress, RankAssignment, Session, SessionCode};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A conditional write lost against a concurrent writer.
    #[error("Version conflict: {0}")]
    Conflict(String),
    /// The backing service could not be reached; worth retrying.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Durable session records. Writes are per-document compare-and-swap on `version`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a brand-new record. The record's `version` is stored as given.
    async fn insert_session(&self, session: &Session) -> PortResult<()>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    /// Every record sharing the code, in no particular order.
    async fn find_sessions_by_code(&self, code: &SessionCode) -> PortResult<Vec<Session>>;

    /// Replaces the record only if its stored version still equals
    /// `expected_version`; otherwise fails with [`PortError::Conflict`].
    async fn replace_session(&self, session: &Session, expected_version: u64) -> PortResult<()>;

    /// Deletes the record only if its stored version equals `expected_version`.
    /// Returns `false` when the record changed or is already gone.
    async fn delete_session(&self, session_id: Uuid, expected_version: u64) -> PortResult<bool>;

    /// Codes held by more than one record.
    async fn find_duplicate_codes(&self) -> PortResult<Vec<SessionCode>>;

    /// Ended records whose scores have not been fully applied yet, oldest end first.
    async fn find_pending_aggregation(&self) -> PortResult<Vec<Session>>;
}

/// Which roster an enrollment is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrollmentScope {
    Class(Uuid),
    /// Sessions without a class fall back to any class taught by the owner.
    Owner(Uuid),
}

#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn check_enrollment(&self, user_id: Uuid, scope: EnrollmentScope) -> PortResult<bool>;

    /// Display details for the class behind a scope, if one can be identified.
    async fn class_summary(&self, scope: EnrollmentScope) -> PortResult<Option<ClassSummary>>;
}

/// Per-student, per-class gamification records.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_progress(&self, student_id: Uuid, class_id: Uuid) -> PortResult<Option<Progress>>;

    /// Inserts (`expected_version == 0`) or conditionally replaces the record.
    async fn save_progress(&self, progress: &Progress, expected_version: u64) -> PortResult<()>;

    /// Every record for the class, sorted by total points descending.
    async fn list_class_progress(&self, class_id: Uuid) -> PortResult<Vec<Progress>>;

    /// Writes derived leaderboard ranks without touching the versioned fields.
    async fn save_ranks(&self, class_id: Uuid, ranks: &[RankAssignment]) -> PortResult<()>;
}

#[async_trait]
pub trait AchievementCatalog: Send + Sync {
    async fn active_achievements(&self) -> PortResult<Vec<AchievementDefinition>>;
}

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
