//! crates/clicker_core/src/engine.rs
//!
//! The transport-agnostic facade over the engine components. Each public
//! method is one logical operation exposed to the service layer.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{AggregationReport, Aggregator, PendingAggregationReport};
use crate::domain::{
    AnswerValue, LeaderboardEntry, LeaderboardWindow, Progress, QuestionDraft, Session, SessionCode,
    SessionSettings,
};
use crate::error::{EngineError, EngineResult};
use crate::join::{JoinIdentity, JoinOutcome, JoinResolver};
use crate::leaderboard::rank;
use crate::lifecycle::{ensure_owner, LifecycleController};
use crate::ports::{AchievementCatalog, Clock, EnrollmentService, ProgressStore, SessionStore};
use crate::reconciler::{Reconciler, SweepReport};
use crate::responses::{ResponseCollector, SubmitOutcome};
use crate::retry::RetryPolicy;
use crate::views::{CurrentQuestionView, SessionResults};
use crate::writer::SessionWriter;

/// Fresh codes tried before a create without an explicit code gives up.
const CODE_GENERATION_ATTEMPTS: u32 = 5;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Age after which a `waiting` record no longer blocks its code.
    pub stale_waiting_ttl: Duration,
    pub retry: RetryPolicy,
    /// Compare-and-swap attempts per write before giving up.
    pub max_write_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stale_waiting_ttl: Duration::hours(12),
            retry: RetryPolicy::default(),
            max_write_attempts: 8,
        }
    }
}

/// The collaborators the engine runs against.
#[derive(Clone)]
pub struct EnginePorts {
    pub sessions: Arc<dyn SessionStore>,
    pub enrollment: Arc<dyn EnrollmentService>,
    pub progress: Arc<dyn ProgressStore>,
    pub achievements: Arc<dyn AchievementCatalog>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct EndOutcome {
    pub session: Session,
    /// `None` when aggregation failed; the session is ended regardless, stays
    /// `aggregation_pending` and can be rescored.
    pub report: Option<AggregationReport>,
}

pub struct SessionEngine {
    reconciler: Arc<Reconciler>,
    lifecycle: LifecycleController,
    joins: JoinResolver,
    responses: ResponseCollector,
    aggregator: Aggregator,
    sessions: Arc<dyn SessionStore>,
    writer: SessionWriter,
    progress: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl SessionEngine {
    pub fn new(ports: EnginePorts, settings: EngineSettings) -> Self {
        let retry = settings.retry;
        let writer = SessionWriter::new(ports.sessions.clone(), retry, settings.max_write_attempts);
        let reconciler = Arc::new(Reconciler::new(
            ports.sessions.clone(),
            writer.clone(),
            ports.clock.clone(),
            retry,
            settings.stale_waiting_ttl,
        ));
        let lifecycle = LifecycleController::new(
            ports.sessions.clone(),
            reconciler.clone(),
            writer.clone(),
            ports.clock.clone(),
            retry,
        );
        let joins = JoinResolver::new(
            reconciler.clone(),
            writer.clone(),
            ports.enrollment.clone(),
            ports.clock.clone(),
            retry,
        );
        let responses = ResponseCollector::new(reconciler.clone(), writer.clone(), ports.clock.clone());
        let aggregator = Aggregator::new(
            ports.progress.clone(),
            ports.achievements.clone(),
            ports.clock.clone(),
            retry,
            settings.max_write_attempts,
        );
        Self {
            reconciler,
            lifecycle,
            joins,
            responses,
            aggregator,
            sessions: ports.sessions,
            writer,
            progress: ports.progress,
            clock: ports.clock,
            retry,
        }
    }

    //=====================================================================================
    // Owner operations
    //=====================================================================================

    /// Creates a session. When no code is given, fresh codes are generated
    /// until one is free or the attempts run out.
    pub async fn create_session(
        &self,
        code: Option<SessionCode>,
        title: &str,
        owner_id: Uuid,
        settings: SessionSettings,
    ) -> EngineResult<Session> {
        match code {
            Some(code) => self.lifecycle.create(code, title, owner_id, settings).await,
            None => {
                self.create_with_generated_code(SessionCode::generate, title, owner_id, settings)
                    .await
            }
        }
    }

    async fn create_with_generated_code<G>(
        &self,
        mut next_code: G,
        title: &str,
        owner_id: Uuid,
        settings: SessionSettings,
    ) -> EngineResult<Session>
    where
        G: FnMut() -> SessionCode + Send,
    {
        let mut attempt = 1;
        loop {
            let code = next_code();
            match self.lifecycle.create(code, title, owner_id, settings.clone()).await {
                Err(EngineError::CodeConflict(taken)) if attempt < CODE_GENERATION_ATTEMPTS => {
                    debug!(code = %taken, attempt, "Generated code is in use, trying another");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn activate_question(
        &self,
        code: &SessionCode,
        owner_id: Uuid,
        draft: QuestionDraft,
    ) -> EngineResult<Session> {
        self.lifecycle.activate_question(code, owner_id, draft).await
    }

    pub async fn extend_timer(&self, code: &SessionCode, owner_id: Uuid, add_seconds: u32) -> EngineResult<Session> {
        self.lifecycle.extend_timer(code, owner_id, add_seconds).await
    }

    pub async fn close_question(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<Session> {
        self.lifecycle.close_question(code, owner_id).await
    }

    /// Ends the session and runs the aggregator for it. Only the call that
    /// performs the transition gets here, so aggregation is triggered once.
    /// Anything left unapplied stays recorded on the session for a later pass.
    pub async fn end_session(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<EndOutcome> {
        let session = self.lifecycle.end(code, owner_id).await?;
        let (session, result) = self.aggregate_and_settle(session).await;
        let report = match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!(code = %session.code, "Aggregation after session end failed: {}", e);
                None
            }
        };
        Ok(EndOutcome { session, report })
    }

    /// Re-runs aggregation for the ended session currently holding `code`,
    /// applying only what earlier passes did not.
    pub async fn rescore_session(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<AggregationReport> {
        let session = self.reconciler.canonical(code).await?;
        ensure_owner(&session, owner_id)?;
        self.aggregate_and_settle(session).await.1
    }

    /// Same as [`Self::rescore_session`], addressed by record id so sessions
    /// whose code has since been reused stay reachable.
    pub async fn rescore_session_by_id(&self, session_id: Uuid, owner_id: Uuid) -> EngineResult<AggregationReport> {
        let store = &self.sessions;
        let session = self
            .retry
            .run("get_session", || store.get_session(session_id))
            .await?;
        ensure_owner(&session, owner_id)?;
        self.aggregate_and_settle(session).await.1
    }

    /// Retries aggregation for every ended session still marked pending,
    /// including sessions ended by a process that stopped before scoring.
    pub async fn aggregate_pending(&self) -> EngineResult<PendingAggregationReport> {
        let store = &self.sessions;
        let pending = self
            .retry
            .run("find_pending_aggregation", || store.find_pending_aggregation())
            .await?;
        let mut report = PendingAggregationReport {
            sessions_examined: pending.len(),
            ..Default::default()
        };
        for session in pending {
            let session_id = session.id;
            let (session, result) = self.aggregate_and_settle(session).await;
            match result {
                Ok(_) if !session.aggregation_pending => report.settled.push(session_id),
                Ok(_) => report.still_pending.push(session_id),
                Err(e) => {
                    warn!(code = %session.code, %session_id, "Pending aggregation failed again: {}", e);
                    report.still_pending.push(session_id);
                }
            }
        }
        info!(
            examined = report.sessions_examined,
            settled = report.settled.len(),
            pending = report.still_pending.len(),
            "Pending aggregation pass finished"
        );
        Ok(report)
    }

    /// Aggregates an ended session and records on it which students, if any,
    /// are still unscored. A failed pass leaves the pending marker untouched.
    async fn aggregate_and_settle(&self, session: Session) -> (Session, EngineResult<AggregationReport>) {
        let report = match self.aggregator.aggregate(&session).await {
            Ok(report) => report,
            Err(e) => return (session, Err(e)),
        };
        let unscored: Vec<Uuid> = report.failures.iter().filter_map(|f| f.student_id).collect();
        let settled = self
            .writer
            .mutate(session.clone(), |s| {
                s.aggregation_pending = !unscored.is_empty();
                s.unscored_students = unscored.clone();
                Ok(())
            })
            .await;
        match settled {
            Ok((session, ())) => (session, Ok(report)),
            Err(e) => {
                warn!(code = %session.code, "Could not record aggregation state: {}", e);
                (session, Ok(report))
            }
        }
    }

    pub async fn session_results(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<SessionResults> {
        let session = self.reconciler.canonical(code).await?;
        ensure_owner(&session, owner_id)?;
        Ok(SessionResults::build(&session))
    }

    //=====================================================================================
    // Polling reads
    //=====================================================================================

    pub async fn session_by_code(&self, code: &SessionCode) -> EngineResult<Session> {
        self.reconciler.canonical(code).await
    }

    pub async fn current_question(&self, code: &SessionCode) -> EngineResult<CurrentQuestionView> {
        let session = self.reconciler.canonical(code).await?;
        Ok(CurrentQuestionView::build(&session, self.clock.now()))
    }

    //=====================================================================================
    // Participant operations
    //=====================================================================================

    pub async fn join(&self, code: &SessionCode, identity: JoinIdentity) -> EngineResult<JoinOutcome> {
        self.joins.join(code, identity).await
    }

    pub async fn submit_response(
        &self,
        code: &SessionCode,
        participant_id: Uuid,
        question_id: Uuid,
        answer: AnswerValue,
    ) -> EngineResult<SubmitOutcome> {
        self.responses
            .submit(code, participant_id, question_id, answer)
            .await
    }

    //=====================================================================================
    // Administration & progress
    //=====================================================================================

    pub async fn sweep_duplicate_sessions(&self) -> EngineResult<SweepReport> {
        self.reconciler.sweep_duplicates().await
    }

    pub async fn class_leaderboard(
        &self,
        class_id: Uuid,
        window: LeaderboardWindow,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let store = &self.progress;
        let rows = self
            .retry
            .run("list_class_progress", || store.list_class_progress(class_id))
            .await?;
        Ok(rank(&rows, window, self.clock.now().date_naive()))
    }

    pub async fn student_progress(&self, class_id: Uuid, student_id: Uuid) -> EngineResult<Progress> {
        let store = &self.progress;
        self.retry
            .run("get_progress", || store.get_progress(student_id, class_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Progress for student {}", student_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuestionKind;
    use crate::memory::{
        InMemoryProgressStore, InMemorySessionStore, ManualClock, StaticAchievementCatalog, StaticRoster,
    };
    use chrono::{TimeZone, Utc};

    fn engine() -> SessionEngine {
        let ports = EnginePorts {
            sessions: Arc::new(InMemorySessionStore::new()),
            enrollment: Arc::new(StaticRoster::new()),
            progress: Arc::new(InMemoryProgressStore::new()),
            achievements: Arc::new(StaticAchievementCatalog::default()),
            clock: Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())),
        };
        let settings = EngineSettings {
            retry: RetryPolicy::immediate(3),
            ..EngineSettings::default()
        };
        SessionEngine::new(ports, settings)
    }

    async fn occupy(engine: &SessionEngine, raw: &str, owner: Uuid) {
        let code = SessionCode::parse(raw).unwrap();
        engine
            .create_session(Some(code.clone()), "Taken", owner, SessionSettings::default())
            .await
            .unwrap();
        let draft = QuestionDraft {
            text: "Ready?".to_string(),
            kind: QuestionKind::TrueFalse { correct_answer: true },
            points: None,
            time_limit_seconds: 30,
        };
        engine.activate_question(&code, owner, draft).await.unwrap();
    }

    #[tokio::test]
    async fn generated_codes_held_by_live_sessions_are_replaced() {
        let engine = engine();
        let owner = Uuid::new_v4();
        occupy(&engine, "TAKEN1", owner).await;

        let mut codes = ["TAKEN1", "TAKEN1", "FRESH1"]
            .into_iter()
            .map(|raw| SessionCode::parse(raw).unwrap());
        let session = engine
            .create_with_generated_code(
                || codes.next().unwrap(),
                "Pop quiz",
                owner,
                SessionSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(session.code.as_str(), "FRESH1");
    }

    #[tokio::test]
    async fn code_generation_gives_up_after_bounded_attempts() {
        let engine = engine();
        let owner = Uuid::new_v4();
        occupy(&engine, "TAKEN1", owner).await;

        let mut calls = 0;
        let result = engine
            .create_with_generated_code(
                || {
                    calls += 1;
                    SessionCode::parse("TAKEN1").unwrap()
                },
                "Pop quiz",
                owner,
                SessionSettings::default(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::CodeConflict(_))));
        assert_eq!(calls, CODE_GENERATION_ATTEMPTS);
    }
}
