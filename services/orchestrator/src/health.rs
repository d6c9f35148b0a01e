//! Health and readiness aggregation (spec.md §4.9). Grounded on
//! `original_source/app/routes/health.py`'s component probes, flattened
//! into one struct the `/health` and `/readiness` handlers both read from.

use serde::Serialize;

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::db::CallsRepository;
use crate::kv::KvStore;
use crate::pbx::{PbxRestClient, PbxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Up,
    Down,
}

impl ComponentStatus {
    fn from_bool(up: bool) -> Self {
        if up {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub database: ComponentStatus,
    pub kv_store: ComponentStatus,
    pub pbx_rest: ComponentStatus,
    pub pbx_event_stream: ComponentStatus,
    pub circuit_breakers: CircuitBreakerSummary,
}

#[derive(Debug, Serialize)]
pub struct CircuitBreakerSummary {
    pub originate: &'static str,
    pub hangup: &'static str,
}

fn breaker_label(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

pub struct HealthChecker {
    calls: CallsRepository,
    kv: KvStore,
    pbx: PbxRestClient,
    pbx_status: PbxStatus,
}

impl HealthChecker {
    pub fn new(calls: CallsRepository, kv: KvStore, pbx: PbxRestClient, pbx_status: PbxStatus) -> Self {
        Self {
            calls,
            kv,
            pbx,
            pbx_status,
        }
    }

    /// Full aggregate report for `GET /health` — every component checked,
    /// none of them gating the response status.
    pub async fn report(
        &self,
        originate_breaker: &CircuitBreaker,
        hangup_breaker: &CircuitBreaker,
    ) -> HealthReport {
        let database = ComponentStatus::from_bool(self.calls.ping().await.is_ok());
        let kv_store = ComponentStatus::from_bool(self.kv.ping().await);
        let pbx_rest = ComponentStatus::from_bool(self.pbx_status.connected_ok() || self.pbx.probe().await);
        let pbx_event_stream = ComponentStatus::from_bool(self.pbx_status.ws_connected());

        let all_up = database == ComponentStatus::Up
            && kv_store == ComponentStatus::Up
            && pbx_rest == ComponentStatus::Up;

        HealthReport {
            status: ComponentStatus::from_bool(all_up),
            database,
            kv_store,
            pbx_rest,
            pbx_event_stream,
            circuit_breakers: CircuitBreakerSummary {
                originate: breaker_label(originate_breaker.state()),
                hangup: breaker_label(hangup_breaker.state()),
            },
        }
    }

    /// `GET /readiness`: true iff DB and KV and PBX REST are up. The event
    /// stream is self-healing and is not required (spec.md §4.9).
    pub async fn ready(&self) -> bool {
        let database_ok = self.calls.ping().await.is_ok();
        let kv_ok = self.kv.ping().await;
        let pbx_ok = self.pbx_status.connected_ok();
        database_ok && kv_ok && pbx_ok
    }
}
