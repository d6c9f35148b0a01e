//! Sliding-window rate limiting and brute-force lockout (spec.md §4.8).
//! Grounded on `original_source/app/middleware/rate_limit.py` (the sliding
//! window) and `original_source/app/services/redis_service.py`'s
//! `track_failed_login`/`reset_failed_logins` (the lockout counter), wired
//! together as one `tower::Layer` the way the teacher's services layer
//! `CorsLayer`/`TraceLayer` onto their routers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use crate::kv::KvStore;

#[derive(Clone, Copy)]
pub struct RateLimitConfig {
    pub default_limit: u32,
    pub default_window: Duration,
    pub token_limit: u32,
    pub token_window: Duration,
    pub max_failed_login_attempts: u32,
    pub login_lockout: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: KvStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(kv: KvStore, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    fn limit_for(&self, path: &str) -> (u32, Duration) {
        if path.ends_with("/token") {
            (self.config.token_limit, self.config.token_window)
        } else {
            (self.config.default_limit, self.config.default_window)
        }
    }

    /// Sliding-window admission for one endpoint + client-identity pair.
    pub async fn admit(&self, path: &str, identity: &str) -> RateLimitDecision {
        let (limit, window) = self.limit_for(path);
        let key = format!("ratelimit:{path}:{identity}");
        let (allowed, remaining) = self.kv.sliding_window_admit(&key, limit, window).await;
        RateLimitDecision {
            allowed,
            limit,
            remaining,
            reset_secs: window.as_secs(),
        }
    }

    fn failed_login_key(username: &str, ip: &str) -> String {
        format!("failed_login:{username}:{ip}")
    }

    fn lockout_key(ip: &str) -> String {
        format!("lockout:{ip}")
    }

    pub async fn lockout_remaining(&self, ip: &str) -> Option<u64> {
        let key = Self::lockout_key(ip);
        match self.kv.ttl(&key).await {
            Ok(ttl) if ttl > 0 => Some(ttl as u64),
            _ => None,
        }
    }

    /// Record a failed `/token` attempt; once the `(username, ip)` counter
    /// crosses `max_failed_login_attempts`, write the lockout key.
    pub async fn record_failed_login(&self, username: &str, ip: &str) -> anyhow::Result<()> {
        let count = self
            .kv
            .increment_with_ttl(&Self::failed_login_key(username, ip), Duration::from_secs(3600))
            .await?;

        if count as u32 >= self.config.max_failed_login_attempts {
            self.kv
                .set_with_ttl(&Self::lockout_key(ip), "locked", self.config.login_lockout)
                .await?;
            tracing::warn!(username, ip, count, "login lockout triggered");
        }
        Ok(())
    }

    pub async fn reset_failed_logins(&self, username: &str, ip: &str) -> anyhow::Result<()> {
        self.kv.delete(&Self::failed_login_key(username, ip)).await
    }
}

pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Derives a stable client identity from the first `X-Forwarded-For` entry
/// (falling back to the socket peer address) combined with a short hash of
/// the user-agent, to reduce NAT aliasing (spec.md §4.8).
pub fn client_identity<B>(req: &Request<B>) -> String {
    let ip = ip_from_headers_and_addr(req.headers(), connect_addr(req));
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let mut hasher = DefaultHasher::new();
    user_agent.hash(&mut hasher);
    format!("{ip}:{:x}", hasher.finish())
}

pub fn client_ip<B>(req: &Request<B>) -> String {
    ip_from_headers_and_addr(req.headers(), connect_addr(req))
}

fn connect_addr<B>(req: &Request<B>) -> Option<std::net::SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|c| c.0)
}

/// Shared by the request-based helpers above and by handlers that only have
/// extracted `HeaderMap`/`ConnectInfo` parts (spec.md §4.8 "client-identity").
pub fn ip_from_headers_and_addr(
    headers: &axum::http::HeaderMap,
    addr: Option<std::net::SocketAddr>,
) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S, B> Service<Request<B>> for RateLimitMiddleware<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let ip = client_ip(&req);

            if let Some(retry_after) = limiter.lockout_remaining(&ip).await {
                return Ok(locked_response(retry_after));
            }

            let identity = client_identity(&req);
            let decision = limiter.admit(&path, &identity).await;
            if !decision.allowed {
                return Ok(rate_limited_response(&decision));
            }

            inner.call(req).await
        })
    }
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(serde_json::json!({
            "error": "rate_limited",
            "detail": "too many requests",
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_secs));
    headers.insert("retry-after", HeaderValue::from(decision.reset_secs));
    response
}

fn locked_response(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(serde_json::json!({
            "error": "locked_out",
            "detail": "too many failed login attempts",
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after_secs));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn client_ip_prefers_forwarded_for_first_entry() {
        let req = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.9");
    }

    #[test]
    fn client_identity_varies_with_user_agent() {
        let req_a = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .header(axum::http::header::USER_AGENT, "curl/8.0")
            .body(())
            .unwrap();
        let req_b = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .header(axum::http::header::USER_AGENT, "Mozilla/5.0")
            .body(())
            .unwrap();
        assert_ne!(client_identity(&req_a), client_identity(&req_b));
    }
}
