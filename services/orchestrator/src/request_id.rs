//! `X-Request-ID` middleware (spec.md §9 ambient-stack supplement, grounded
//! on `original_source/app/main.py`'s `RequestIDMiddleware`): every request
//! gets an id, generated if the caller didn't supply one, echoed back on
//! the response and attached to the tracing span.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

const HEADER_NAME: &str = "x-request-id";

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", request_id = %request_id);

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(HEADER_NAME, value.clone());
    }

    let mut response = next.run(req).instrument(span).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(HEADER_NAME, value);
    }
    response
}
