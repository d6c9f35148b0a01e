//! `POST /interaction/{number}`, `POST /calls`, `GET /calls/{call_id}` and
//! its `/status/{call_id}` alias (spec.md §6). All three require a bearer
//! token; the pipeline work is delegated to `origination::OriginationPipeline`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dto::{CallStatusResponse, CreateCallRequest, OriginateOverrides, OriginateResponse};
use uuid::Uuid;

use super::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/interaction/:number", post(originate_via_path))
        .route("/api/v1/calls", post(originate_via_body))
        .route("/api/v1/calls/:call_id", get(call_status))
        .route("/api/v1/status/:call_id", get(call_status))
}

async fn originate_via_path(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(number): Path<String>,
    body: Bytes,
) -> ApiResult<Json<OriginateResponse>> {
    let overrides = if body.is_empty() {
        OriginateOverrides::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ApiError::Validation(err.to_string()))?
    };

    let request = CreateCallRequest {
        phone_number: number,
        overrides,
    };
    let response = state.origination.originate(request).await?;
    Ok(Json(response))
}

async fn originate_via_body(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Json(request): Json<CreateCallRequest>,
) -> ApiResult<Json<OriginateResponse>> {
    let response = state.origination.originate(request).await?;
    Ok(Json(response))
}

async fn call_status(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    Path(call_id): Path<Uuid>,
) -> ApiResult<Json<CallStatusResponse>> {
    let call = state.origination.status_of(call_id).await?;
    Ok(Json(call.into()))
}
