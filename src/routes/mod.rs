//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/credits", get(http::http_get_credits))
        .route("/api/v1/lesson", post(http::http_post_lesson))
        .route("/api/v1/lesson/status", get(http::http_get_lesson_status))
        .route("/api/v1/lesson/save", post(http::http_post_lesson_save))
        .route("/api/v1/lesson/load", post(http::http_post_lesson_load))
        .route("/api/v1/history", get(http::http_get_history))
        .route("/api/v1/history/select", post(http::http_post_history_select))
        .route("/api/v1/draft", get(http::http_get_draft).put(http::http_put_draft))
        .route("/api/v1/draft/restore", post(http::http_post_draft_restore))
        .route("/api/v1/draft/discard", post(http::http_post_draft_discard))
        .route("/api/v1/topic/random", get(http::http_get_random_topic))
        .route("/api/v1/exam", post(http::http_post_exam))
        .route("/api/v1/test", get(http::http_get_test))
        .route("/api/v1/test/start", post(http::http_post_test_start))
        .route("/api/v1/test/answer", post(http::http_post_test_answer))
        .route("/api/v1/test/next", post(http::http_post_test_next))
        .route("/api/v1/test/quit", post(http::http_post_test_quit))
        .route("/api/v1/export", get(http::http_get_export))
        .route("/api/v1/preferences", get(http::http_get_preferences).put(http::http_put_preferences))
        .route("/api/v1/feedback", post(http::http_post_feedback))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
