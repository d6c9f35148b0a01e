//! Contact-center outbound-call orchestrator: bootstraps Postgres, Redis,
//! the PBX connector and its event-stream reconnect loop, then serves the
//! HTTP API. Grounded on `original_source/app/main.py`'s wiring — a single
//! process owning explicit collaborators, no global singletons
//! (spec.md §9).

mod circuit_breaker;
mod config;
mod db;
mod error;
mod health;
mod kv;
mod origination;
mod pbx;
mod rate_limit;
mod reconciler;
mod request_id;
mod routes;
mod state;
mod state_machine;
mod token_service;
mod validation;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::middleware;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use circuit_breaker::CircuitBreaker;
use config::Settings;
use db::{CallsRepository, UsersRepository};
use health::HealthChecker;
use kv::KvStore;
use origination::OriginationPipeline;
use pbx::{PbxEventStream, PbxRestClient, PbxStatus};
use rate_limit::{RateLimitConfig, RateLimitLayer, RateLimiter};
use reconciler::Reconciler;
use state::AppState;
use token_service::TokenService;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match Settings::load() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .expect("failed to connect to postgres");

    if !settings.disable_db {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("failed to run migrations");
    }

    let kv = KvStore::connect(&settings.redis_url)
        .await
        .expect("failed to connect to redis");

    let calls = CallsRepository::new(pool.clone());
    let users = UsersRepository::new(pool.clone());

    let pbx_rest = PbxRestClient::new(&settings).expect("failed to build PBX REST client");
    let pbx_status = PbxStatus::default();
    pbx_status.set_connected_ok(pbx_rest.probe().await);

    let reconciler = Reconciler::new(calls.clone(), kv.clone());
    let mut event_stream = PbxEventStream::new(&settings, pbx_status.clone());
    let reconciler_for_wildcard = reconciler.clone();
    event_stream.register_wildcard(Arc::new(move |event: &dto::PbxEvent| {
        let reconciler = reconciler_for_wildcard.clone();
        let event = event.clone();
        tokio::spawn(async move { reconciler.handle_event(&event).await });
    }));
    let stop_handle = event_stream.stop_handle();
    let event_stream = Arc::new(event_stream);
    let event_stream_task = {
        let event_stream = event_stream.clone();
        tokio::spawn(async move { event_stream.run().await })
    };

    let originate_breaker = Arc::new(CircuitBreaker::new(
        "originate",
        settings.circuit_breaker_fail_threshold,
        Duration::from_secs(settings.circuit_breaker_timeout),
    ));
    let hangup_breaker = Arc::new(CircuitBreaker::new(
        "hangup",
        settings.circuit_breaker_fail_threshold,
        Duration::from_secs(settings.circuit_breaker_timeout),
    ));

    let origination = Arc::new(OriginationPipeline::new(
        calls.clone(),
        PbxRestClient::new(&settings).expect("failed to build PBX REST client"),
        originate_breaker.clone(),
        settings.default_context.clone(),
        settings.default_extension.clone(),
        settings.default_priority,
        settings.default_timeout,
        settings.default_caller_id.clone(),
    ));

    let tokens = Arc::new(TokenService::new(settings.clone(), kv.clone()));

    let rate_limiter = RateLimiter::new(
        kv.clone(),
        RateLimitConfig {
            default_limit: settings.rate_limit_requests,
            default_window: Duration::from_secs(settings.rate_limit_window),
            token_limit: settings.token_rate_limit_requests,
            token_window: Duration::from_secs(settings.rate_limit_window),
            max_failed_login_attempts: settings.max_failed_login_attempts,
            login_lockout: Duration::from_secs(settings.login_lockout_duration),
        },
    );

    let health_checker = Arc::new(HealthChecker::new(
        calls.clone(),
        kv.clone(),
        PbxRestClient::new(&settings).expect("failed to build PBX REST client"),
        pbx_status.clone(),
    ));

    let metrics_handle = if settings.metrics_enabled {
        PrometheusBuilder::new().install_recorder().ok()
    } else {
        None
    };

    let allowed_origins = settings.allowed_origins_list();
    let cors = if settings.debug && allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods([Method::GET, Method::POST, Method::DELETE])
    .allow_headers(tower_http::cors::Any);

    let app_state = AppState {
        settings: settings.clone(),
        users,
        origination,
        tokens,
        rate_limiter: rate_limiter.clone(),
        health: health_checker,
        originate_breaker,
        hangup_breaker,
        pbx_status: pbx_status.clone(),
        metrics_handle,
    };

    let app = routes::router(app_state)
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(%addr, "orchestrator starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server exited with error");

    stop_handle.store(true, Ordering::Relaxed);
    let _ = tokio::time::timeout(Duration::from_secs(10), event_stream_task).await;
    pool.close().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
