//! services/api/src/web/progress.rs
//!
//! Read-only gamification endpoints: class leaderboards and a student's own
//! progress record.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use clicker_core::{EngineError, LeaderboardEntry, LeaderboardWindow, Progress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::web::middleware::Caller;
use crate::web::state::AppState;

#[derive(Deserialize, IntoParams)]
pub struct LeaderboardQuery {
    /// `all_time` (default), `weekly` or `monthly`.
    pub window: Option<String>,
}

fn parse_window(raw: Option<&str>) -> ApiResult<LeaderboardWindow> {
    match raw.map(str::trim) {
        None | Some("") | Some("all_time") => Ok(LeaderboardWindow::AllTime),
        Some("weekly") => Ok(LeaderboardWindow::Weekly),
        Some("monthly") => Ok(LeaderboardWindow::Monthly),
        Some(other) => Err(ApiError::BadRequest(format!(
            "unknown leaderboard window '{}'",
            other
        ))),
    }
}

/// A progress record plus derived figures.
#[derive(Serialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub progress: Progress,
    /// Percentage of answered questions that were correct.
    pub lifetime_accuracy: f64,
}

/// Ranked students of a class for one window.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/leaderboard",
    tag = "progress",
    responses(
        (status = 200, description = "Leaderboard entries, best first"),
        (status = 400, description = "Unknown window")
    ),
    params(
        ("class_id" = Uuid, Path, description = "Class id."),
        LeaderboardQuery
    )
)]
pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let window = parse_window(query.window.as_deref())?;
    let entries = state.engine.class_leaderboard(class_id, window).await?;
    Ok(Json(entries))
}

/// A student's progress in a class. Students may only read their own.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/progress/{student_id}",
    tag = "progress",
    responses(
        (status = 200, description = "The progress record"),
        (status = 403, description = "Caller is not that student"),
        (status = 404, description = "No progress yet")
    ),
    params(
        ("class_id" = Uuid, Path, description = "Class id."),
        ("student_id" = Uuid, Path, description = "Student id."),
        ("x-user-id" = Uuid, Header, description = "The student.")
    )
)]
pub async fn student_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path((class_id, student_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ProgressView>> {
    if caller.require()? != student_id {
        return Err(EngineError::Forbidden.into());
    }
    let progress = state.engine.student_progress(class_id, student_id).await?;
    Ok(Json(ProgressView {
        lifetime_accuracy: progress.lifetime_accuracy(),
        progress,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_to_all_time() {
        assert_eq!(parse_window(None).unwrap(), LeaderboardWindow::AllTime);
        assert_eq!(parse_window(Some("weekly")).unwrap(), LeaderboardWindow::Weekly);
        assert!(parse_window(Some("yearly")).is_err());
    }
}
