//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the Postgres implementation of
//! the `SessionStore`, `ProgressStore` and `AchievementCatalog` ports from the
//! core crate. Session sub-documents are stored as JSONB; every write is a
//! compare-and-swap on the `version` column.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clicker_core::domain::{
    AchievementCriteria, AchievementDefinition, Participant, Progress, Question, QuestionLogEntry,
    RankAssignment, Rarity, Response, Session, SessionCode, SessionSettings, SessionStatus,
};
use clicker_core::ports::{AchievementCatalog, PortError, PortResult, ProgressStore, SessionStore};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter implementing the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Connection-level failures are worth retrying; everything else is not.
pub(crate) fn map_db_err(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => PortError::Unavailable(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn to_db_version(version: u64) -> PortResult<i64> {
    i64::try_from(version).map_err(|_| PortError::Unexpected(format!("version {} out of range", version)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const SESSION_COLUMNS: &str = "id, code, title, owner_id, status, settings, current_question, \
    question_log, participants, responses, created_at, started_at, ended_at, needs_review, \
    aggregation_pending, unscored_students, version";

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    code: String,
    title: String,
    owner_id: Uuid,
    status: String,
    settings: Json<SessionSettings>,
    current_question: Option<Json<Question>>,
    question_log: Json<Vec<QuestionLogEntry>>,
    participants: Json<Vec<Participant>>,
    responses: Json<Vec<Response>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    needs_review: bool,
    aggregation_pending: bool,
    unscored_students: Json<Vec<Uuid>>,
    version: i64,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let code = SessionCode::parse(&self.code)
            .map_err(|e| PortError::Unexpected(format!("stored session {}: {}", self.id, e)))?;
        let status = self
            .status
            .parse::<SessionStatus>()
            .map_err(|e| PortError::Unexpected(format!("stored session {}: {}", self.id, e)))?;
        Ok(Session {
            id: self.id,
            code,
            title: self.title,
            owner_id: self.owner_id,
            status,
            settings: self.settings.0,
            current_question: self.current_question.map(|q| q.0),
            question_log: self.question_log.0,
            participants: self.participants.0,
            responses: self.responses.0,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            needs_review: self.needs_review,
            aggregation_pending: self.aggregation_pending,
            unscored_students: self.unscored_students.0,
            version: u64::try_from(self.version).unwrap_or_default(),
        })
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    student_id: Uuid,
    class_id: Uuid,
    level: i32,
    experience: i64,
    total_points: i64,
    weekly_points: i64,
    week_start: Option<NaiveDate>,
    monthly_points: i64,
    month_start: Option<NaiveDate>,
    current_streak: i32,
    longest_streak: i32,
    last_activity_date: Option<NaiveDate>,
    quizzes_taken: i32,
    total_answered: i32,
    total_correct: i32,
    fast_responses: i32,
    perfect_scores: i32,
    achievements: Json<BTreeMap<Uuid, DateTime<Utc>>>,
    scored_sessions: Json<BTreeSet<Uuid>>,
    class_rank: Option<i32>,
    weekly_rank: Option<i32>,
    monthly_rank: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

// Counters are written from unsigned values and never go negative.
fn unsigned(v: i32) -> u32 {
    u32::try_from(v).unwrap_or_default()
}

fn unsigned_wide(v: i64) -> u64 {
    u64::try_from(v).unwrap_or_default()
}

impl ProgressRecord {
    fn to_domain(self) -> Progress {
        Progress {
            student_id: self.student_id,
            class_id: self.class_id,
            level: unsigned(self.level),
            experience: unsigned_wide(self.experience),
            total_points: unsigned_wide(self.total_points),
            weekly_points: unsigned_wide(self.weekly_points),
            week_start: self.week_start,
            monthly_points: unsigned_wide(self.monthly_points),
            month_start: self.month_start,
            current_streak: unsigned(self.current_streak),
            longest_streak: unsigned(self.longest_streak),
            last_activity_date: self.last_activity_date,
            quizzes_taken: unsigned(self.quizzes_taken),
            total_answered: unsigned(self.total_answered),
            total_correct: unsigned(self.total_correct),
            fast_responses: unsigned(self.fast_responses),
            perfect_scores: unsigned(self.perfect_scores),
            achievements: self.achievements.0,
            scored_sessions: self.scored_sessions.0,
            class_rank: self.class_rank.map(unsigned),
            weekly_rank: self.weekly_rank.map(unsigned),
            monthly_rank: self.monthly_rank.map(unsigned),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: unsigned_wide(self.version),
        }
    }
}

#[derive(FromRow)]
struct AchievementRecord {
    id: Uuid,
    code: String,
    name: String,
    description: String,
    criteria: Json<AchievementCriteria>,
    points: i32,
    rarity: String,
    is_active: bool,
}

impl AchievementRecord {
    fn to_domain(self) -> PortResult<AchievementDefinition> {
        let rarity: Rarity = serde_json::from_value(serde_json::Value::String(self.rarity))
            .map_err(|e| PortError::Unexpected(format!("achievement {}: {}", self.code, e)))?;
        Ok(AchievementDefinition {
            id: self.id,
            code: self.code,
            name: self.name,
            description: self.description,
            criteria: self.criteria.0,
            points: unsigned(self.points),
            rarity,
            is_active: self.is_active,
        })
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn insert_session(&self, session: &Session) -> PortResult<()> {
        let result = sqlx::query(
            "INSERT INTO sessions (id, code, title, owner_id, status, settings, current_question, \
             question_log, participants, responses, created_at, started_at, ended_at, needs_review, \
             aggregation_pending, unscored_students, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(session.id)
        .bind(session.code.as_str())
        .bind(&session.title)
        .bind(session.owner_id)
        .bind(session.status.as_str())
        .bind(Json(&session.settings))
        .bind(session.current_question.as_ref().map(Json))
        .bind(Json(&session.question_log))
        .bind(Json(&session.participants))
        .bind(Json(&session.responses))
        .bind(session.created_at)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.needs_review)
        .bind(session.aggregation_pending)
        .bind(Json(&session.unscored_students))
        .bind(to_db_version(session.version)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(PortError::Conflict(
                format!("session {} already exists", session.id),
            )),
            Err(e) => Err(map_db_err(e)),
        }
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| PortError::NotFound(format!("Session {}", session_id)))?;
        record.to_domain()
    }

    async fn find_sessions_by_code(&self, code: &SessionCode) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE code = $1",
            SESSION_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn replace_session(&self, session: &Session, expected_version: u64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET title = $3, owner_id = $4, status = $5, settings = $6, \
             current_question = $7, question_log = $8, participants = $9, responses = $10, \
             started_at = $11, ended_at = $12, needs_review = $13, aggregation_pending = $14, \
             unscored_students = $15, version = $16 \
             WHERE id = $1 AND version = $2",
        )
        .bind(session.id)
        .bind(to_db_version(expected_version)?)
        .bind(&session.title)
        .bind(session.owner_id)
        .bind(session.status.as_str())
        .bind(Json(&session.settings))
        .bind(session.current_question.as_ref().map(Json))
        .bind(Json(&session.question_log))
        .bind(Json(&session.participants))
        .bind(Json(&session.responses))
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.needs_review)
        .bind(session.aggregation_pending)
        .bind(Json(&session.unscored_students))
        .bind(to_db_version(session.version)?)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        // Tell a lost race apart from a missing record.
        let exists = sqlx::query_scalar::<_, i64>("SELECT version FROM sessions WHERE id = $1")
            .bind(session.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        match exists {
            Some(stored) => Err(PortError::Conflict(format!(
                "session {} is at version {}, expected {}",
                session.id, stored, expected_version
            ))),
            None => Err(PortError::NotFound(format!("Session {}", session.id))),
        }
    }

    async fn delete_session(&self, session_id: Uuid, expected_version: u64) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND version = $2")
            .bind(session_id)
            .bind(to_db_version(expected_version)?)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_duplicate_codes(&self) -> PortResult<Vec<SessionCode>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT code FROM sessions GROUP BY code HAVING COUNT(*) > 1 ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        codes
            .iter()
            .map(|c| SessionCode::parse(c).map_err(|e| PortError::Unexpected(e.to_string())))
            .collect()
    }

    async fn find_pending_aggregation(&self) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE status = 'ended' AND aggregation_pending \
             ORDER BY ended_at, id",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        records.into_iter().map(SessionRecord::to_domain).collect()
    }
}

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

const PROGRESS_COLUMNS: &str = "student_id, class_id, level, experience, total_points, weekly_points, \
    week_start, monthly_points, month_start, current_streak, longest_streak, last_activity_date, \
    quizzes_taken, total_answered, total_correct, fast_responses, perfect_scores, achievements, \
    scored_sessions, class_rank, weekly_rank, monthly_rank, created_at, updated_at, version";

fn signed(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn signed_wide(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait]
impl ProgressStore for DbAdapter {
    async fn get_progress(&self, student_id: Uuid, class_id: Uuid) -> PortResult<Option<Progress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(&format!(
            "SELECT {} FROM student_progress WHERE student_id = $1 AND class_id = $2",
            PROGRESS_COLUMNS
        ))
        .bind(student_id)
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(record.map(ProgressRecord::to_domain))
    }

    async fn save_progress(&self, progress: &Progress, expected_version: u64) -> PortResult<()> {
        let sql = if expected_version == 0 {
            format!(
                "INSERT INTO student_progress ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25) \
                 ON CONFLICT (student_id, class_id) DO NOTHING",
                PROGRESS_COLUMNS
            )
        } else {
            "UPDATE student_progress SET level = $3, experience = $4, total_points = $5, \
             weekly_points = $6, week_start = $7, monthly_points = $8, month_start = $9, \
             current_streak = $10, longest_streak = $11, last_activity_date = $12, \
             quizzes_taken = $13, total_answered = $14, total_correct = $15, fast_responses = $16, \
             perfect_scores = $17, achievements = $18, scored_sessions = $19, class_rank = $20, \
             weekly_rank = $21, monthly_rank = $22, created_at = $23, updated_at = $24, version = $25 \
             WHERE student_id = $1 AND class_id = $2 AND version = $26"
                .to_string()
        };

        let mut query = sqlx::query(&sql)
            .bind(progress.student_id)
            .bind(progress.class_id)
            .bind(signed(progress.level))
            .bind(signed_wide(progress.experience))
            .bind(signed_wide(progress.total_points))
            .bind(signed_wide(progress.weekly_points))
            .bind(progress.week_start)
            .bind(signed_wide(progress.monthly_points))
            .bind(progress.month_start)
            .bind(signed(progress.current_streak))
            .bind(signed(progress.longest_streak))
            .bind(progress.last_activity_date)
            .bind(signed(progress.quizzes_taken))
            .bind(signed(progress.total_answered))
            .bind(signed(progress.total_correct))
            .bind(signed(progress.fast_responses))
            .bind(signed(progress.perfect_scores))
            .bind(Json(&progress.achievements))
            .bind(Json(&progress.scored_sessions))
            .bind(progress.class_rank.map(signed))
            .bind(progress.weekly_rank.map(signed))
            .bind(progress.monthly_rank.map(signed))
            .bind(progress.created_at)
            .bind(progress.updated_at)
            .bind(to_db_version(progress.version)?);
        if expected_version != 0 {
            query = query.bind(to_db_version(expected_version)?);
        }

        let result = query.execute(&self.pool).await.map_err(map_db_err)?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(PortError::Conflict(format!(
                "progress for student {} in class {} changed (expected version {})",
                progress.student_id, progress.class_id, expected_version
            )))
        }
    }

    async fn list_class_progress(&self, class_id: Uuid) -> PortResult<Vec<Progress>> {
        let records = sqlx::query_as::<_, ProgressRecord>(&format!(
            "SELECT {} FROM student_progress WHERE class_id = $1 ORDER BY total_points DESC",
            PROGRESS_COLUMNS
        ))
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(records.into_iter().map(ProgressRecord::to_domain).collect())
    }

    async fn save_ranks(&self, class_id: Uuid, ranks: &[RankAssignment]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        for assignment in ranks {
            sqlx::query(
                "UPDATE student_progress SET class_rank = $3, weekly_rank = $4, monthly_rank = $5 \
                 WHERE student_id = $1 AND class_id = $2",
            )
            .bind(assignment.student_id)
            .bind(class_id)
            .bind(signed(assignment.class_rank))
            .bind(signed(assignment.weekly_rank))
            .bind(signed(assignment.monthly_rank))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }
        tx.commit().await.map_err(map_db_err)
    }
}

//=========================================================================================
// `AchievementCatalog` Trait Implementation
//=========================================================================================

#[async_trait]
impl AchievementCatalog for DbAdapter {
    async fn active_achievements(&self) -> PortResult<Vec<AchievementDefinition>> {
        let records = sqlx::query_as::<_, AchievementRecord>(
            "SELECT id, code, name, description, criteria, points, rarity, is_active \
             FROM achievements WHERE is_active ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        records.into_iter().map(AchievementRecord::to_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_retryable() {
        assert!(map_db_err(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!map_db_err(sqlx::Error::RowNotFound).is_transient());
        assert!(matches!(map_db_err(sqlx::Error::RowNotFound), PortError::NotFound(_)));
    }

    #[test]
    fn stored_rarity_strings_parse() {
        let record = AchievementRecord {
            id: Uuid::new_v4(),
            code: "flawless".to_string(),
            name: "Flawless".to_string(),
            description: "Perfect score".to_string(),
            criteria: Json(AchievementCriteria {
                kind: clicker_core::CriteriaKind::PerfectScores,
                threshold: 1.0,
            }),
            points: 50,
            rarity: "epic".to_string(),
            is_active: true,
        };
        let definition = record.to_domain().unwrap();
        assert_eq!(definition.rarity, Rarity::Epic);
        assert_eq!(definition.points, 50);
    }
}
