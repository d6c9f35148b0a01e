//! Error-kind taxonomy and its HTTP mapping (spec.md §7 "Error handling
//! design"). Grounded on the teacher's `ApiError` in
//! `services/api/src/main.rs`, extended with the kinds spec.md names:
//! validation, authentication, lockout, not-found, dependency-disabled,
//! infrastructure. "Service-degraded" is not an error at all (spec.md §7)
//! and is represented as `Ok(OriginateResponse{success: false, ..})`.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed")]
    Authentication,

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found")]
    NotFound,

    #[error("dependency disabled")]
    DependencyDisabled(&'static str),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, headers): (StatusCode, serde_json::Value, Option<(HeaderValue, String)>) =
            match &self {
                ApiError::Validation(reason) => (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "validation_error", "detail": reason }),
                    None,
                ),
                ApiError::Authentication => (
                    StatusCode::UNAUTHORIZED,
                    json!({ "error": "authentication_error", "detail": "invalid credentials" }),
                    None,
                ),
                ApiError::RateLimited { retry_after_secs } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({ "error": "rate_limited", "detail": "too many requests" }),
                    Some((
                        HeaderValue::from_static("retry-after"),
                        retry_after_secs.to_string(),
                    )),
                ),
                ApiError::NotFound => (
                    StatusCode::NOT_FOUND,
                    json!({ "error": "not_found", "detail": "resource not found" }),
                    None,
                ),
                ApiError::DependencyDisabled(name) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "dependency_disabled", "detail": format!("{name} disabled") }),
                    None,
                ),
                ApiError::Infrastructure(err) => {
                    tracing::error!(error = %err, "unhandled infrastructure error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": "infrastructure_error", "detail": "internal server error" }),
                        None,
                    )
                }
            };

        let mut response = (status, Json(body)).into_response();
        if let Some((_, value)) = headers {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                let mut map = HeaderMap::new();
                map.insert(axum::http::header::RETRY_AFTER, header_value);
                response.headers_mut().extend(map);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
