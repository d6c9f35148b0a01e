//! `POST /token` (spec.md §6): form-encoded credentials in, a signed token
//! pair out. Grounded on `original_source/app/routes/auth.py`'s login
//! handler, generalized onto `token_service::TokenService` and the
//! brute-force counter from `rate_limit::RateLimiter`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Form, Json, Router};
use dto::TokenPair;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::rate_limit::ip_from_headers_and_addr;
use crate::state::AppState;
use crate::token_service::verify_password;

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/token", post(issue_token))
}

async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    addr: Option<ConnectInfo<SocketAddr>>,
    Form(form): Form<TokenForm>,
) -> ApiResult<Json<TokenPair>> {
    let ip = ip_from_headers_and_addr(&headers, addr.map(|a| a.0));

    let user = state
        .users
        .find_active_by_username(&form.username)
        .await
        .map_err(ApiError::Infrastructure)?;

    let authenticated = user
        .as_ref()
        .map(|u| verify_password(&form.password, &u.hashed_password))
        .unwrap_or(false);

    if !authenticated {
        state
            .rate_limiter
            .record_failed_login(&form.username, &ip)
            .await
            .map_err(ApiError::Infrastructure)?;
        return Err(ApiError::Authentication);
    }

    state
        .rate_limiter
        .reset_failed_logins(&form.username, &ip)
        .await
        .map_err(ApiError::Infrastructure)?;

    let pair = state
        .tokens
        .issue(&form.username)
        .await
        .map_err(ApiError::Infrastructure)?;

    Ok(Json(pair))
}
