//! Explicit application state (spec.md §9 "Cyclic references" design note:
//! no global singletons — every collaborator is wired once at startup and
//! handed to the handlers that need it, the way `original_source`'s
//! module-level singletons are replaced by owned/shared handles here).

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Settings;
use crate::db::{CallsRepository, UsersRepository};
use crate::health::HealthChecker;
use crate::kv::KvStore;
use crate::origination::OriginationPipeline;
use crate::pbx::PbxStatus;
use crate::rate_limit::RateLimiter;
use crate::token_service::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub users: UsersRepository,
    pub origination: Arc<OriginationPipeline>,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: RateLimiter,
    pub health: Arc<HealthChecker>,
    pub originate_breaker: Arc<CircuitBreaker>,
    pub hangup_breaker: Arc<CircuitBreaker>,
    pub pbx_status: PbxStatus,
    pub metrics_handle: Option<PrometheusHandle>,
}
