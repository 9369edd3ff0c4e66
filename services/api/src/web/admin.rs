//! services/api/src/web/admin.rs

use axum::{extract::State, Json};
use clicker_core::aggregator::PendingAggregationReport;
use clicker_core::reconciler::SweepReport;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::web::state::AppState;

/// Delete or flag non-canonical records that share a code. Safe to re-run.
#[utoipa::path(
    post,
    path = "/admin/sweep-duplicates",
    tag = "admin",
    responses(
        (status = 200, description = "Sweep report"),
        (status = 401, description = "Missing or wrong admin token")
    ),
    params(("Authorization" = String, Header, description = "`Bearer <ADMIN_TOKEN>`"))
)]
pub async fn sweep_duplicates_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<SweepReport>> {
    let report = state.engine.sweep_duplicate_sessions().await?;
    Ok(Json(report))
}

/// Retry scoring for every ended session whose scores are not fully applied.
#[utoipa::path(
    post,
    path = "/admin/aggregate-pending",
    tag = "admin",
    responses(
        (status = 200, description = "Sessions settled and still pending"),
        (status = 401, description = "Missing or wrong admin token")
    ),
    params(("Authorization" = String, Header, description = "`Bearer <ADMIN_TOKEN>`"))
)]
pub async fn aggregate_pending_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<PendingAggregationReport>> {
    let report = state.engine.aggregate_pending().await?;
    Ok(Json(report))
}
