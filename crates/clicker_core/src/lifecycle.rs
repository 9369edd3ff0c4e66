//! crates/clicker_core/src/lifecycle.rs
//!
//! Drives session status transitions and question activation/closure.
//!
//! ```text
//! waiting --activate_question--> active --activate_question--> active
//!    |                              |
//!    +------------end---------------+--> ended (terminal)
//! ```

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::answer::normalize;
use crate::domain::{
    AnswerValue, Question, QuestionDraft, QuestionKind, Session, SessionCode, SessionSettings,
    SessionStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::ports::{Clock, SessionStore};
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;
use crate::writer::SessionWriter;

const MAX_TITLE_LEN: usize = 200;
const MAX_QUESTION_TEXT_LEN: usize = 2000;
const MAX_OPTIONS: usize = 10;
const MAX_TIME_LIMIT_SECONDS: u32 = 3600;
const MAX_EXTENSION_SECONDS: u32 = 600;

pub struct LifecycleController {
    store: Arc<dyn SessionStore>,
    reconciler: Arc<Reconciler>,
    writer: SessionWriter,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        reconciler: Arc<Reconciler>,
        writer: SessionWriter,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            reconciler,
            writer,
            clock,
            retry,
        }
    }

    /// Creates a `waiting` session. Stale waiting records for the code are
    /// reclaimed first; only an `active` record blocks the code.
    pub async fn create(
        &self,
        code: SessionCode,
        title: &str,
        owner_id: Uuid,
        settings: SessionSettings,
    ) -> EngineResult<Session> {
        let title = title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(EngineError::Validation(format!(
                "title must be 1-{} characters",
                MAX_TITLE_LEN
            )));
        }

        self.reconciler.reclaim_stale(&code).await?;
        let existing = self.reconciler.records(&code).await?;
        if existing.iter().any(|s| s.status == SessionStatus::Active) {
            return Err(EngineError::CodeConflict(code));
        }

        let session = Session::new(code, title.to_string(), owner_id, settings, self.clock.now());
        let store = &self.store;
        self.retry
            .run("insert_session", || store.insert_session(&session))
            .await?;
        info!(code = %session.code, session_id = %session.id, %owner_id, "Session created");
        Ok(session)
    }

    /// Closes any current question into the log and makes `draft` current.
    /// The first activation moves the session from `waiting` to `active`.
    pub async fn activate_question(
        &self,
        code: &SessionCode,
        owner_id: Uuid,
        draft: QuestionDraft,
    ) -> EngineResult<Session> {
        validate_draft(&draft)?;
        let session = self.owned_canonical(code, owner_id).await?;
        let now = self.clock.now();
        let question = Question {
            id: Uuid::new_v4(),
            text: draft.text.trim().to_string(),
            kind: draft.kind,
            points: draft.points.unwrap_or(1),
            time_limit_seconds: draft.time_limit_seconds,
            original_time_limit_seconds: draft.time_limit_seconds,
            started_at: now,
        };

        let (session, ()) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                s.close_current_question(now);
                if s.status == SessionStatus::Waiting {
                    s.status = SessionStatus::Active;
                    s.started_at = Some(now);
                }
                s.current_question = Some(question.clone());
                Ok(())
            })
            .await?;
        info!(code = %session.code, question_id = %question.id, "Question activated");
        Ok(session)
    }

    /// Adds time to the current question. Concurrent extensions sum.
    pub async fn extend_timer(
        &self,
        code: &SessionCode,
        owner_id: Uuid,
        add_seconds: u32,
    ) -> EngineResult<Session> {
        if add_seconds == 0 || add_seconds > MAX_EXTENSION_SECONDS {
            return Err(EngineError::Validation(format!(
                "timer extensions must be 1-{} seconds",
                MAX_EXTENSION_SECONDS
            )));
        }
        let session = self.owned_canonical(code, owner_id).await?;
        let (session, ()) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                let question = s
                    .current_question
                    .as_mut()
                    .ok_or_else(|| EngineError::NotFound("Current question".to_string()))?;
                question.time_limit_seconds = question.time_limit_seconds.saturating_add(add_seconds);
                Ok(())
            })
            .await?;
        info!(code = %session.code, add_seconds, "Question timer extended");
        Ok(session)
    }

    /// Closes the current question; the session stays `active`.
    pub async fn close_question(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<Session> {
        let session = self.owned_canonical(code, owner_id).await?;
        let now = self.clock.now();
        let (session, closed) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                s.close_current_question(now)
                    .ok_or_else(|| EngineError::NotFound("Current question".to_string()))
            })
            .await?;
        info!(code = %session.code, question_id = %closed, "Question closed");
        Ok(session)
    }

    /// Ends the session. Succeeds only for the call that performs the
    /// transition; any later call sees `SessionEnded`. The ended record is
    /// marked `aggregation_pending` until its scores are fully applied.
    pub async fn end(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<Session> {
        let session = self.owned_canonical(code, owner_id).await?;
        let now = self.clock.now();
        let (session, ()) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                s.close_current_question(now);
                s.status = SessionStatus::Ended;
                s.ended_at = Some(now);
                s.aggregation_pending = true;
                Ok(())
            })
            .await?;
        info!(
            code = %session.code,
            questions = session.question_log.len(),
            participants = session.participants.len(),
            "Session ended"
        );
        Ok(session)
    }

    async fn owned_canonical(&self, code: &SessionCode, owner_id: Uuid) -> EngineResult<Session> {
        let session = self.reconciler.canonical(code).await?;
        ensure_owner(&session, owner_id)?;
        ensure_not_ended(&session)?;
        Ok(session)
    }
}

pub(crate) fn ensure_owner(session: &Session, caller: Uuid) -> EngineResult<()> {
    if session.owner_id != caller {
        return Err(EngineError::Forbidden);
    }
    Ok(())
}

pub(crate) fn ensure_not_ended(session: &Session) -> EngineResult<()> {
    if session.is_ended() {
        return Err(EngineError::SessionEnded(session.code.clone()));
    }
    Ok(())
}

fn validate_draft(draft: &QuestionDraft) -> EngineResult<()> {
    let text = draft.text.trim();
    if text.is_empty() || text.chars().count() > MAX_QUESTION_TEXT_LEN {
        return Err(EngineError::Validation(format!(
            "question text must be 1-{} characters",
            MAX_QUESTION_TEXT_LEN
        )));
    }
    if draft.time_limit_seconds == 0 || draft.time_limit_seconds > MAX_TIME_LIMIT_SECONDS {
        return Err(EngineError::Validation(format!(
            "time limit must be 1-{} seconds",
            MAX_TIME_LIMIT_SECONDS
        )));
    }
    if draft.points == Some(0) {
        return Err(EngineError::Validation("points must be at least 1".to_string()));
    }
    match &draft.kind {
        QuestionKind::MultipleChoice {
            options,
            correct_answer,
        } => {
            if options.len() < 2 || options.len() > MAX_OPTIONS {
                return Err(EngineError::Validation(format!(
                    "multiple choice questions need 2-{} options",
                    MAX_OPTIONS
                )));
            }
            if options.iter().any(|o| o.trim().is_empty()) {
                return Err(EngineError::Validation("options must not be empty".to_string()));
            }
            let correct = normalize(&AnswerValue::Text(correct_answer.clone()));
            let listed = options
                .iter()
                .any(|o| normalize(&AnswerValue::Text(o.clone())) == correct);
            if !listed {
                return Err(EngineError::Validation(
                    "the correct answer must be one of the options".to_string(),
                ));
            }
        }
        QuestionKind::ShortAnswer { correct_answer } => {
            if correct_answer.trim().is_empty() {
                return Err(EngineError::Validation("correct answer must not be empty".to_string()));
            }
        }
        QuestionKind::Numeric { correct_answer } => {
            if !correct_answer.is_finite() {
                return Err(EngineError::Validation("correct answer must be a finite number".to_string()));
            }
        }
        QuestionKind::TrueFalse { .. } => {}
    }
    Ok(())
}
