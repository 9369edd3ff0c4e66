//! crates/clicker_core/src/domain.rs
//!
//! Defines the core data structures of the session engine: sessions with their
//! question, participant and response logs, and the per-student progress record
//! written by the aggregator. These types are storage-agnostic; adapters map
//! them onto their own record shapes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

//=========================================================================================
// Session Codes
//=========================================================================================

const CODE_MIN_LEN: usize = 4;
const CODE_MAX_LEN: usize = 12;
const GENERATED_CODE_LEN: usize = 6;
/// Letters and digits that cannot be confused when read off a projector.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// The short, human-typed code identifying a session. Always stored uppercase.
///
/// Codes are intended to be unique but the store does not enforce it; see
/// [`crate::reconciler`] for how duplicates are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Parses and normalizes a code typed by a user.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() < CODE_MIN_LEN || code.len() > CODE_MAX_LEN {
            return Err(EngineError::Validation(format!(
                "session code must be {}-{} characters",
                CODE_MIN_LEN, CODE_MAX_LEN
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::Validation(
                "session code may only contain letters and digits".to_string(),
            ));
        }
        Ok(Self(code))
    }

    /// Generates a random code from an unambiguous alphabet.
    pub fn generate() -> Self {
        let entropy = Uuid::new_v4();
        let code = entropy
            .as_bytes()
            .iter()
            .take(GENERATED_CODE_LEN)
            .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

//=========================================================================================
// Session
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(EngineError::Validation(format!("unknown session status '{}'", other))),
        }
    }
}

/// Owner-chosen policies for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub require_login: bool,
    #[serde(default)]
    pub restrict_to_enrolled: bool,
    #[serde(default)]
    pub allow_answer_change: bool,
    #[serde(default)]
    pub class_id: Option<Uuid>,
}

/// One timed quiz/clicker session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub code: SessionCode,
    pub title: String,
    pub owner_id: Uuid,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    pub current_question: Option<Question>,
    /// Every question ever activated, appended when it closes. Never edited.
    pub question_log: Vec<QuestionLogEntry>,
    pub participants: Vec<Participant>,
    pub responses: Vec<Response>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Set by the duplicate sweeper on non-canonical records it refused to delete.
    pub needs_review: bool,
    /// Set in the same write that ends the session; cleared once every
    /// student's score has been applied.
    #[serde(default)]
    pub aggregation_pending: bool,
    /// Students whose progress write failed on the last aggregation pass.
    #[serde(default)]
    pub unscored_students: Vec<Uuid>,
    /// Optimistic concurrency counter; bumped by every successful write.
    pub version: u64,
}

impl Session {
    /// Builds a fresh `waiting` session. The record is not persisted yet (`version == 0`).
    pub fn new(
        code: SessionCode,
        title: String,
        owner_id: Uuid,
        settings: SessionSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            title,
            owner_id,
            status: SessionStatus::Waiting,
            settings,
            current_question: None,
            question_log: Vec::new(),
            participants: Vec::new(),
            responses: Vec::new(),
            created_at: now,
            started_at: None,
            ended_at: None,
            needs_review: false,
            aggregation_pending: false,
            unscored_students: Vec::new(),
            version: 0,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    pub fn participant(&self, participant_id: Uuid) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }

    /// The participant a device rejoins as. A signed-in user gets their own
    /// participant on the device, or an anonymous one to claim, but never
    /// another user's. An anonymous join takes the device's latest participant.
    pub fn rejoin_target_mut(&mut self, device_id: &str, user_id: Option<Uuid>) -> Option<&mut Participant> {
        let on_device = |p: &Participant| p.device_id.as_deref() == Some(device_id);
        let index = match user_id {
            Some(user) => self
                .participants
                .iter()
                .position(|p| on_device(p) && p.user_id == Some(user))
                .or_else(|| {
                    self.participants
                        .iter()
                        .position(|p| on_device(p) && p.user_id.is_none())
                }),
            None => self.participants.iter().rposition(|p| on_device(p)),
        }?;
        self.participants.get_mut(index)
    }

    pub fn response_mut(&mut self, participant_id: Uuid, question_id: Uuid) -> Option<&mut Response> {
        self.responses
            .iter_mut()
            .find(|r| r.participant_id == participant_id && r.question_id == question_id)
    }

    pub fn responses_for(&self, question_id: Uuid) -> impl Iterator<Item = &Response> {
        self.responses
            .iter()
            .filter(move |r| r.question_id == question_id)
    }

    /// Moves the current question, if any, into the log with a `closed_at` stamp.
    pub(crate) fn close_current_question(&mut self, now: DateTime<Utc>) -> Option<Uuid> {
        let question = self.current_question.take()?;
        let id = question.id;
        self.question_log.push(QuestionLogEntry {
            question,
            closed_at: now,
        });
        Some(id)
    }
}

//=========================================================================================
// Questions
//=========================================================================================

/// The kind-specific part of a question. Each kind has a fixed field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
        correct_answer: String,
    },
    TrueFalse {
        correct_answer: bool,
    },
    ShortAnswer {
        correct_answer: String,
    },
    Numeric {
        correct_answer: f64,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::TrueFalse { .. } => "true_false",
            QuestionKind::ShortAnswer { .. } => "short_answer",
            QuestionKind::Numeric { .. } => "numeric",
        }
    }

    pub fn correct_answer(&self) -> AnswerValue {
        match self {
            QuestionKind::MultipleChoice { correct_answer, .. }
            | QuestionKind::ShortAnswer { correct_answer } => {
                AnswerValue::Text(correct_answer.clone())
            }
            QuestionKind::TrueFalse { correct_answer } => AnswerValue::Bool(*correct_answer),
            QuestionKind::Numeric { correct_answer } => AnswerValue::Number(*correct_answer),
        }
    }

    /// The choices shown to participants; empty for free-entry kinds.
    pub fn options(&self) -> Vec<String> {
        match self {
            QuestionKind::MultipleChoice { options, .. } => options.clone(),
            QuestionKind::TrueFalse { .. } => vec!["True".to_string(), "False".to_string()],
            QuestionKind::ShortAnswer { .. } | QuestionKind::Numeric { .. } => Vec::new(),
        }
    }
}

/// A question as submitted by the owner, before activation assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub points: Option<u32>,
    pub time_limit_seconds: u32,
}

/// An activated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    pub points: u32,
    /// Live time limit, including every extension.
    pub time_limit_seconds: u32,
    /// The limit the question was activated with.
    pub original_time_limit_seconds: u32,
    pub started_at: DateTime<Utc>,
}

impl Question {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(i64::from(self.time_limit_seconds))
    }

    /// Seconds left on the timer, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline() - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionLogEntry {
    pub question: Question,
    pub closed_at: DateTime<Utc>,
}

impl QuestionLogEntry {
    /// Seconds the question was open for, extensions included.
    pub fn granted_seconds(&self) -> u32 {
        self.question.time_limit_seconds
    }
}

//=========================================================================================
// Participants & Responses
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub name: String,
    pub is_enrolled: bool,
    pub joined_at: DateTime<Utc>,
    pub last_joined_at: DateTime<Utc>,
}

/// An answer value as sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Bool(b) => write!(f, "{}", b),
            AnswerValue::Number(n) => write!(f, "{}", n),
            AnswerValue::Text(t) => f.write_str(t),
        }
    }
}

/// One participant's effective answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response_id: Uuid,
    pub participant_id: Uuid,
    pub question_id: Uuid,
    pub answer: AnswerValue,
    pub submitted_at: DateTime<Utc>,
    pub first_submitted_at: DateTime<Utc>,
    /// 0 for the first submission, incremented on every accepted change.
    pub revision: u32,
    pub question_text: String,
    pub correct_answer: AnswerValue,
}

//=========================================================================================
// Classes & Access Context
//=========================================================================================

/// What the roster service knows about a class, used in client-facing errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class_id: Uuid,
    pub name: String,
    pub join_code: Option<String>,
}

/// Context attached to `AuthRequired` / `NotEnrolled` so a UI can guide the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub session_code: SessionCode,
    pub session_title: String,
    pub class_id: Option<Uuid>,
    pub class_name: Option<String>,
    pub join_code: Option<String>,
}

impl AccessContext {
    pub fn for_session(session: &Session, class: Option<ClassSummary>) -> Self {
        let class_id = class
            .as_ref()
            .map(|c| c.class_id)
            .or(session.settings.class_id);
        let (class_name, join_code) = match class {
            Some(c) => (Some(c.name), c.join_code),
            None => (None, None),
        };
        Self {
            session_code: session.code.clone(),
            session_title: session.title.clone(),
            class_id,
            class_name,
            join_code,
        }
    }
}

//=========================================================================================
// Progress & Achievements
//=========================================================================================

/// A student's cumulative gamification state within one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub level: u32,
    pub experience: u64,
    pub total_points: u64,
    pub weekly_points: u64,
    pub week_start: Option<NaiveDate>,
    pub monthly_points: u64,
    pub month_start: Option<NaiveDate>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub quizzes_taken: u32,
    pub total_answered: u32,
    pub total_correct: u32,
    pub fast_responses: u32,
    pub perfect_scores: u32,
    /// Achievement id to the moment it was earned.
    pub achievements: BTreeMap<Uuid, DateTime<Utc>>,
    /// Sessions whose results are already folded into this record.
    pub scored_sessions: BTreeSet<Uuid>,
    pub class_rank: Option<u32>,
    pub weekly_rank: Option<u32>,
    pub monthly_rank: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Progress {
    /// A new, unpersisted record at level 1.
    pub fn new(student_id: Uuid, class_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            student_id,
            class_id,
            level: 1,
            experience: 0,
            total_points: 0,
            weekly_points: 0,
            week_start: None,
            monthly_points: 0,
            month_start: None,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            quizzes_taken: 0,
            total_answered: 0,
            total_correct: 0,
            fast_responses: 0,
            perfect_scores: 0,
            achievements: BTreeMap::new(),
            scored_sessions: BTreeSet::new(),
            class_rank: None,
            weekly_rank: None,
            monthly_rank: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Lifetime accuracy as a percentage (0-100).
    pub fn lifetime_accuracy(&self) -> f64 {
        if self.total_answered == 0 {
            return 0.0;
        }
        f64::from(self.total_correct) / f64::from(self.total_answered) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaKind {
    QuizzesTaken,
    TotalPoints,
    CurrentStreak,
    FastResponses,
    PerfectScores,
    Accuracy,
    Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementCriteria {
    #[serde(rename = "type")]
    pub kind: CriteriaKind,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// A criteria-gated award, owned by the achievement catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub criteria: AchievementCriteria,
    pub points: u32,
    pub rarity: Rarity,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardWindow {
    AllTime,
    Weekly,
    Monthly,
}

/// Ranks computed for one student across every leaderboard window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankAssignment {
    pub student_id: Uuid,
    pub class_rank: u32,
    pub weekly_rank: u32,
    pub monthly_rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub student_id: Uuid,
    pub points: u64,
    pub level: u32,
    pub current_streak: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalized_to_uppercase() {
        let code = SessionCode::parse("  ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn codes_reject_punctuation_and_bad_lengths() {
        assert!(SessionCode::parse("AB-12").is_err());
        assert!(SessionCode::parse("ABC").is_err());
        assert!(SessionCode::parse("ABCDEFGHIJKLM").is_err());
    }

    #[test]
    fn generated_codes_parse_back() {
        for _ in 0..50 {
            let code = SessionCode::generate();
            assert_eq!(SessionCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn question_kind_roundtrips_with_type_tag() {
        let draft: QuestionDraft = serde_json::from_value(serde_json::json!({
            "text": "Pick one",
            "type": "multiple_choice",
            "options": ["A", "B"],
            "correct_answer": "B",
            "time_limit_seconds": 30
        }))
        .unwrap();
        assert_eq!(draft.kind.type_name(), "multiple_choice");
        assert_eq!(draft.kind.correct_answer(), AnswerValue::Text("B".to_string()));
    }
}
