//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the registry.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{media_ws, transcript_ws, AppState};
use crate::error::BridgeResult;
use crate::{APP_NAME, SERVICE_ID};

/// Builds the API router.
///
/// The media path is configuration (the provider's webhook setup decides
/// it); everything else is fixed.
pub fn create_router(state: AppState) -> Router {
    let media_path = state.config.media_path.clone();
    Router::new()
        .route(&media_path, any(media_ws::ws_handler))
        .route(
            "/transcription/{session_id}",
            any(transcript_ws::ws_handler),
        )
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_id}/metrics", get(session_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Identification probe for deployment checks.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_ID,
        "name": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.session_count(),
    }))
}

/// Lists live sessions with their bound directions.
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.registry.list() }))
}

/// Non-blocking counters snapshot for one session.
async fn session_metrics(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    let snapshot = state.registry.snapshot(&session_id)?;
    Ok(Json(snapshot))
}
