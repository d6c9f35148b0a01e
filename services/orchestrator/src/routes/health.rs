//! `/health`, `/readiness`, `/metrics`, and the root banner (spec.md §4.9
//! plus the ambient-stack additions recorded in `SPEC_FULL.md`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/readiness", get(readiness))
        .route("/metrics", get(metrics))
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": format!("{} orchestrator", state.settings.app_name),
        "version": state.settings.app_version,
        "health": "/health",
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state
        .health
        .report(&state.originate_breaker, &state.hangup_breaker)
        .await;
    Json(report)
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.ready().await {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings.metrics_enabled {
        return (StatusCode::NOT_FOUND, String::new());
    }
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
