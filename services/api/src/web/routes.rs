//! services/api/src/web/routes.rs
//!
//! Assembles the full application router.

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::middleware::{require_admin, resolve_caller, USER_ID_HEADER};
use crate::web::state::AppState;
use crate::web::{admin, progress, rest};

pub fn create_router(state: Arc<AppState>) -> Router {
    let session_routes = Router::new()
        .route("/sessions", post(rest::create_session_handler))
        .route("/sessions/{code}", get(rest::get_session_handler))
        .route("/sessions/{code}/current-question", get(rest::current_question_handler))
        .route("/sessions/{code}/questions", post(rest::activate_question_handler))
        .route(
            "/sessions/{code}/current-question/extend",
            post(rest::extend_timer_handler),
        )
        .route(
            "/sessions/{code}/current-question/close",
            post(rest::close_question_handler),
        )
        .route("/sessions/{code}/end", post(rest::end_session_handler))
        .route("/sessions/{code}/join", post(rest::join_handler))
        .route("/sessions/{code}/responses", post(rest::submit_response_handler))
        .route("/sessions/{code}/results", get(rest::results_handler))
        .route("/sessions/{code}/rescore", post(rest::rescore_handler))
        .route(
            "/session-records/{session_id}/rescore",
            post(rest::rescore_by_id_handler),
        )
        .route("/classes/{class_id}/leaderboard", get(progress::leaderboard_handler))
        .route(
            "/classes/{class_id}/progress/{student_id}",
            get(progress::student_progress_handler),
        );

    let admin_routes = Router::new()
        .route("/admin/sweep-duplicates", post(admin::sweep_duplicates_handler))
        .route("/admin/aggregate-pending", post(admin::aggregate_pending_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_admin));

    let api_router = Router::new()
        .merge(session_routes)
        .merge(admin_routes)
        .layer(axum_middleware::from_fn(resolve_caller))
        .layer(cors_layer(&state.config.cors_origin))
        .with_state(state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", rest::ApiDoc::openapi()))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ]);
    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin).allow_credentials(true),
        Err(_) => {
            warn!(origin, "CORS_ORIGIN is not a valid header value; cross-origin requests disabled");
            layer
        }
    }
}
