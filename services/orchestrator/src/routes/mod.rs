//! axum handlers, one module per resource (spec.md §6 "HTTP API").

pub mod calls;
pub mod health;
pub mod token;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use dto::{AuthClaims, TokenType};

use crate::error::ApiError;
use crate::state::AppState;

/// Extracts and verifies the bearer token carried by a request, per
/// spec.md §6's `auth: bearer` column. Rejects with 401 on anything short
/// of a valid, unrevoked access token.
pub struct AuthUser(pub AuthClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Authentication)?;

        let token = header.strip_prefix("Bearer ").ok_or(ApiError::Authentication)?;
        let claims = state.tokens.verify(token, TokenType::Access).await?;
        Ok(AuthUser(claims))
    }
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .merge(token::router())
        .merge(calls::router())
        .merge(health::router())
        .with_state(state)
}
