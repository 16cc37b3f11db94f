//! API route definitions.

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws::handler::ws_handler;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Tracing layer with request timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/models", get(handlers::list_models))
        .route("/api/auth/status", get(handlers::auth_status))
        .route(
            "/api/conversations/{id}/messages",
            post(handlers::send_message),
        )
        .route(
            "/api/conversations/{id}/abort",
            post(handlers::abort_message),
        )
        .route("/api/conversations/{id}/model", put(handlers::update_model))
        .route(
            "/api/conversations/{id}/session",
            get(handlers::session_stats).delete(handlers::destroy_session),
        )
        .route("/api/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
        .with_state(state)
}
