//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the session endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Participants poll `GET /sessions/{code}/current-question`; nothing is
//! pushed. Owner-only routes need the `x-user-id` header of the session owner.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use clicker_core::aggregator::AggregationReport;
use clicker_core::views::{CurrentQuestionView, SessionResults, SessionSummary};
use clicker_core::{AnswerValue, JoinIdentity, QuestionDraft, QuestionKind, SessionCode, SessionSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::web::middleware::Caller;
use crate::web::state::AppState;
use crate::web::{admin, progress};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        get_session_handler,
        current_question_handler,
        activate_question_handler,
        extend_timer_handler,
        close_question_handler,
        end_session_handler,
        join_handler,
        submit_response_handler,
        results_handler,
        rescore_handler,
        rescore_by_id_handler,
        progress::leaderboard_handler,
        progress::student_progress_handler,
        admin::sweep_duplicates_handler,
        admin::aggregate_pending_handler,
    ),
    components(
        schemas(
            CreateSessionRequest,
            ActivateQuestionRequest,
            QuestionKindBody,
            ExtendTimerRequest,
            JoinRequest,
            JoinResponse,
            SubmitResponseRequest,
            SubmitResponseBody,
            EndSessionResponse,
        )
    ),
    tags(
        (name = "sessions", description = "Live session lifecycle, joining and answering."),
        (name = "progress", description = "Class leaderboards and student progress."),
        (name = "admin", description = "Operational endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// A custom code; one is generated when omitted.
    pub code: Option<String>,
    pub title: String,
    #[serde(default)]
    pub require_login: bool,
    #[serde(default)]
    pub restrict_to_enrolled: bool,
    #[serde(default)]
    pub allow_answer_change: bool,
    pub class_id: Option<Uuid>,
}

/// Kind-specific question fields, selected by `type`.
#[derive(Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKindBody {
    MultipleChoice { options: Vec<String>, correct_answer: String },
    TrueFalse { correct_answer: bool },
    ShortAnswer { correct_answer: String },
    Numeric { correct_answer: f64 },
}

impl From<QuestionKindBody> for QuestionKind {
    fn from(body: QuestionKindBody) -> Self {
        match body {
            QuestionKindBody::MultipleChoice { options, correct_answer } => {
                QuestionKind::MultipleChoice { options, correct_answer }
            }
            QuestionKindBody::TrueFalse { correct_answer } => QuestionKind::TrueFalse { correct_answer },
            QuestionKindBody::ShortAnswer { correct_answer } => QuestionKind::ShortAnswer { correct_answer },
            QuestionKindBody::Numeric { correct_answer } => QuestionKind::Numeric { correct_answer },
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ActivateQuestionRequest {
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKindBody,
    /// Defaults to 1.
    pub points: Option<u32>,
    pub time_limit_seconds: u32,
}

impl From<ActivateQuestionRequest> for QuestionDraft {
    fn from(req: ActivateQuestionRequest) -> Self {
        QuestionDraft {
            text: req.text,
            kind: req.kind.into(),
            points: req.points,
            time_limit_seconds: req.time_limit_seconds,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ExtendTimerRequest {
    pub add_seconds: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct JoinRequest {
    pub name: String,
    /// Stable per-device id; rejoining with it returns the same participant.
    pub device_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct JoinResponse {
    pub participant_id: Uuid,
    pub name: String,
    pub is_reconnect: bool,
    #[schema(value_type = Object)]
    pub session: SessionSummary,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitResponseRequest {
    pub participant_id: Uuid,
    pub question_id: Uuid,
    /// A string, number or boolean depending on the question type.
    #[schema(value_type = Object)]
    pub answer: AnswerValue,
}

#[derive(Serialize, ToSchema)]
pub struct SubmitResponseBody {
    pub response_id: Uuid,
    pub is_update: bool,
    pub is_duplicate: bool,
}

#[derive(Serialize, ToSchema)]
pub struct EndSessionResponse {
    #[schema(value_type = Object)]
    pub session: SessionSummary,
    /// Absent when aggregation failed; rescore the session to retry.
    #[schema(value_type = Object, nullable)]
    pub report: Option<AggregationReport>,
}

fn parse_code(raw: &str) -> ApiResult<SessionCode> {
    Ok(SessionCode::parse(raw)?)
}

//=========================================================================================
// Owner Handlers
//=========================================================================================

/// Create a new session in the `waiting` state.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created"),
        (status = 400, description = "Invalid title or code"),
        (status = 401, description = "Missing x-user-id header"),
        (status = 409, description = "The code is held by an active session")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let owner_id = caller.require()?;
    let code = req.code.as_deref().map(SessionCode::parse).transpose()?;
    let settings = SessionSettings {
        require_login: req.require_login,
        restrict_to_enrolled: req.restrict_to_enrolled,
        allow_answer_change: req.allow_answer_change,
        class_id: req.class_id,
    };
    let session = state
        .engine
        .create_session(code, &req.title, owner_id, settings)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionSummary::from(&session))))
}

/// Activate a question, closing the current one. The first activation starts the session.
#[utoipa::path(
    post,
    path = "/sessions/{code}/questions",
    tag = "sessions",
    request_body = ActivateQuestionRequest,
    responses(
        (status = 200, description = "Question activated"),
        (status = 400, description = "Invalid question"),
        (status = 403, description = "Caller does not own the session"),
        (status = 409, description = "Session has ended")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn activate_question_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
    Json(req): Json<ActivateQuestionRequest>,
) -> ApiResult<Json<SessionSummary>> {
    let owner_id = caller.require()?;
    let session = state
        .engine
        .activate_question(&parse_code(&code)?, owner_id, req.into())
        .await?;
    Ok(Json(SessionSummary::from(&session)))
}

/// Add time to the current question.
#[utoipa::path(
    post,
    path = "/sessions/{code}/current-question/extend",
    tag = "sessions",
    request_body = ExtendTimerRequest,
    responses(
        (status = 200, description = "Timer extended"),
        (status = 404, description = "No current question")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn extend_timer_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
    Json(req): Json<ExtendTimerRequest>,
) -> ApiResult<Json<SessionSummary>> {
    let owner_id = caller.require()?;
    let session = state
        .engine
        .extend_timer(&parse_code(&code)?, owner_id, req.add_seconds)
        .await?;
    Ok(Json(SessionSummary::from(&session)))
}

/// Close the current question without activating another.
#[utoipa::path(
    post,
    path = "/sessions/{code}/current-question/close",
    tag = "sessions",
    responses(
        (status = 200, description = "Question closed"),
        (status = 404, description = "No current question")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn close_question_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    let owner_id = caller.require()?;
    let session = state
        .engine
        .close_question(&parse_code(&code)?, owner_id)
        .await?;
    Ok(Json(SessionSummary::from(&session)))
}

/// End the session and score it.
#[utoipa::path(
    post,
    path = "/sessions/{code}/end",
    tag = "sessions",
    responses(
        (status = 200, description = "Session ended", body = EndSessionResponse),
        (status = 409, description = "Session already ended")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
) -> ApiResult<Json<EndSessionResponse>> {
    let owner_id = caller.require()?;
    let outcome = state.engine.end_session(&parse_code(&code)?, owner_id).await?;
    Ok(Json(EndSessionResponse {
        session: SessionSummary::from(&outcome.session),
        report: outcome.report,
    }))
}

/// Per-question results over closed questions.
#[utoipa::path(
    get,
    path = "/sessions/{code}/results",
    tag = "sessions",
    responses(
        (status = 200, description = "Results for every closed question"),
        (status = 403, description = "Caller does not own the session")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn results_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
) -> ApiResult<Json<SessionResults>> {
    let owner_id = caller.require()?;
    let results = state
        .engine
        .session_results(&parse_code(&code)?, owner_id)
        .await?;
    Ok(Json(results))
}

/// Re-run scoring for an ended session. Already-applied students are skipped.
#[utoipa::path(
    post,
    path = "/sessions/{code}/rescore",
    tag = "sessions",
    responses(
        (status = 200, description = "Aggregation report"),
        (status = 400, description = "Session has not ended")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn rescore_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
) -> ApiResult<Json<AggregationReport>> {
    let owner_id = caller.require()?;
    let report = state
        .engine
        .rescore_session(&parse_code(&code)?, owner_id)
        .await?;
    Ok(Json(report))
}

/// Re-run scoring for one ended session record, even after its code was reused.
#[utoipa::path(
    post,
    path = "/session-records/{session_id}/rescore",
    tag = "sessions",
    responses(
        (status = 200, description = "Aggregation report"),
        (status = 400, description = "Session has not ended"),
        (status = 403, description = "Caller does not own the session"),
        (status = 404, description = "No such session record")
    ),
    params(
        ("session_id" = Uuid, Path, description = "Session record id."),
        ("x-user-id" = Uuid, Header, description = "The session owner.")
    )
)]
pub async fn rescore_by_id_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<AggregationReport>> {
    let owner_id = caller.require()?;
    let report = state.engine.rescore_session_by_id(session_id, owner_id).await?;
    Ok(Json(report))
}

//=========================================================================================
// Participant Handlers
//=========================================================================================

/// Look up a session by code.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    responses(
        (status = 200, description = "The session, without answer keys"),
        (status = 404, description = "Unknown code")
    ),
    params(("code" = String, Path, description = "Session code."))
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    let session = state.engine.session_by_code(&parse_code(&code)?).await?;
    Ok(Json(SessionSummary::from(&session)))
}

/// The question participants should currently see, polled by clients.
#[utoipa::path(
    get,
    path = "/sessions/{code}/current-question",
    tag = "sessions",
    responses(
        (status = 200, description = "Current question and timer"),
        (status = 404, description = "Unknown code")
    ),
    params(("code" = String, Path, description = "Session code."))
)]
pub async fn current_question_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<CurrentQuestionView>> {
    let view = state.engine.current_question(&parse_code(&code)?).await?;
    Ok(Json(view))
}

/// Join a session, or rejoin from the same device.
#[utoipa::path(
    post,
    path = "/sessions/{code}/join",
    tag = "sessions",
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Joined", body = JoinResponse),
        (status = 401, description = "Sign-in required"),
        (status = 403, description = "Not enrolled in the class"),
        (status = 409, description = "Session has ended")
    ),
    params(
        ("code" = String, Path, description = "Session code."),
        ("x-user-id" = Option<Uuid>, Header, description = "The signed-in user, if any.")
    )
)]
pub async fn join_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<Json<JoinResponse>> {
    let identity = JoinIdentity {
        user_id: caller.user_id(),
        device_id: req.device_id,
        name: req.name,
    };
    let outcome = state.engine.join(&parse_code(&code)?, identity).await?;
    Ok(Json(JoinResponse {
        participant_id: outcome.participant.participant_id,
        name: outcome.participant.name,
        is_reconnect: outcome.is_reconnect,
        session: SessionSummary::from(&outcome.session),
    }))
}

/// Submit an answer to the current question.
#[utoipa::path(
    post,
    path = "/sessions/{code}/responses",
    tag = "sessions",
    request_body = SubmitResponseRequest,
    responses(
        (status = 200, description = "Recorded, updated, or ignored as a duplicate", body = SubmitResponseBody),
        (status = 400, description = "Answer does not fit the question"),
        (status = 409, description = "The question is closed or the session has ended")
    ),
    params(("code" = String, Path, description = "Session code."))
)]
pub async fn submit_response_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<SubmitResponseRequest>,
) -> ApiResult<Json<SubmitResponseBody>> {
    let outcome = state
        .engine
        .submit_response(&parse_code(&code)?, req.participant_id, req.question_id, req.answer)
        .await?;
    Ok(Json(SubmitResponseBody {
        response_id: outcome.response_id,
        is_update: outcome.is_update,
        is_duplicate: outcome.is_duplicate,
    }))
}
