//! Read models served to polling clients and session owners.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::answer::{answers_match, normalize};
use crate::domain::{AnswerValue, Question, Session, SessionCode, SessionStatus};

/// A question as participants may see it: no answer key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicQuestion {
    pub id: Uuid,
    pub text: String,
    pub question_type: &'static str,
    pub options: Vec<String>,
    pub points: u32,
    pub time_limit_seconds: u32,
    pub started_at: DateTime<Utc>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            text: q.text.clone(),
            question_type: q.kind.type_name(),
            options: q.kind.options(),
            points: q.points,
            time_limit_seconds: q.time_limit_seconds,
            started_at: q.started_at,
        }
    }
}

/// What a polling client needs to render the live question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentQuestionView {
    pub session_id: Uuid,
    pub code: SessionCode,
    pub status: SessionStatus,
    pub question: Option<PublicQuestion>,
    pub remaining_seconds: Option<i64>,
    /// 1-based position of the current (or next) question in the session.
    pub question_number: usize,
    pub participant_count: usize,
    pub response_count: usize,
}

impl CurrentQuestionView {
    pub fn build(session: &Session, now: DateTime<Utc>) -> Self {
        let current = session.current_question.as_ref();
        Self {
            session_id: session.id,
            code: session.code.clone(),
            status: session.status,
            question: current.map(PublicQuestion::from),
            remaining_seconds: current.map(|q| q.remaining_seconds(now)),
            question_number: session.question_log.len() + 1,
            participant_count: session.participants.len(),
            response_count: current
                .map(|q| session.responses_for(q.id).count())
                .unwrap_or(0),
        }
    }
}

/// The session without answer keys or other participants' data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub code: SessionCode,
    pub title: String,
    pub status: SessionStatus,
    pub require_login: bool,
    pub restrict_to_enrolled: bool,
    pub allow_answer_change: bool,
    pub class_id: Option<Uuid>,
    pub current_question: Option<PublicQuestion>,
    pub questions_asked: usize,
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Ended, but some scores are not applied yet.
    pub aggregation_pending: bool,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id,
            code: s.code.clone(),
            title: s.title.clone(),
            status: s.status,
            require_login: s.settings.require_login,
            restrict_to_enrolled: s.settings.restrict_to_enrolled,
            allow_answer_change: s.settings.allow_answer_change,
            class_id: s.settings.class_id,
            current_question: s.current_question.as_ref().map(PublicQuestion::from),
            questions_asked: s.question_log.len() + usize::from(s.current_question.is_some()),
            participant_count: s.participants.len(),
            created_at: s.created_at,
            started_at: s.started_at,
            ended_at: s.ended_at,
            aggregation_pending: s.aggregation_pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionResult {
    pub question_id: Uuid,
    pub text: String,
    pub question_type: &'static str,
    pub correct_answer: AnswerValue,
    pub response_count: usize,
    pub correct_count: usize,
    /// Normalized answer to how many participants gave it.
    pub distribution: BTreeMap<String, usize>,
    pub closed_at: DateTime<Utc>,
}

/// Per-question results for the owner, over closed questions only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResults {
    pub session_id: Uuid,
    pub code: SessionCode,
    pub status: SessionStatus,
    pub participant_count: usize,
    pub questions: Vec<QuestionResult>,
}

impl SessionResults {
    pub fn build(session: &Session) -> Self {
        let questions = session
            .question_log
            .iter()
            .map(|entry| {
                let q = &entry.question;
                let mut distribution = BTreeMap::new();
                let mut response_count = 0;
                let mut correct_count = 0;
                for r in session.responses_for(q.id) {
                    response_count += 1;
                    if answers_match(&r.answer, &r.correct_answer) {
                        correct_count += 1;
                    }
                    *distribution.entry(normalize(&r.answer)).or_insert(0) += 1;
                }
                QuestionResult {
                    question_id: q.id,
                    text: q.text.clone(),
                    question_type: q.kind.type_name(),
                    correct_answer: q.kind.correct_answer(),
                    response_count,
                    correct_count,
                    distribution,
                    closed_at: entry.closed_at,
                }
            })
            .collect();
        Self {
            session_id: session.id,
            code: session.code.clone(),
            status: session.status,
            participant_count: session.participants.len(),
            questions,
        }
    }
}
