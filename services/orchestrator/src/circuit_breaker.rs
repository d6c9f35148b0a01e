//! Circuit breaker protecting PBX calls (spec.md §4.3). Grounded on
//! `original_source/app/services/circuit_breaker.py`'s
//! `AsteriskCircuitBreaker`, which wraps `aiobreaker` with the same
//! CLOSED/OPEN/HALF_OPEN states and the same `fail_max=5`,
//! `timeout=60s` defaults. Rust has no ambient breaker crate in the pack,
//! so this is a small hand-rolled state machine behind a `Mutex`, the same
//! shape as `state_machine.rs`'s pure transition function but with mutable
//! counters since failures accumulate over real time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    fail_count: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: &'static str,
    fail_max: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

/// Returned when the breaker is open and the call was short-circuited.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker '{0}' is open")]
pub struct BreakerOpen(pub &'static str);

impl CircuitBreaker {
    pub fn new(name: &'static str, fail_max: u32, timeout: Duration) -> Self {
        Self {
            name,
            fail_max,
            timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                fail_count: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.refresh_state();
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn fail_count(&self) -> u32 {
        self.inner.lock().expect("breaker mutex poisoned").fail_count
    }

    /// Moves OPEN -> HALF_OPEN once `timeout` has elapsed since opening.
    fn refresh_state(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.timeout {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    /// Run `f` through the breaker. Any `Err` returned by `f` (or an
    /// `Ok(false)` structured-failure reported via `is_failure`) counts as a
    /// breaker failure. When the breaker is open, `f` is never invoked.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<Result<T, E>, BreakerOpen>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.refresh_state();

        let allow = {
            let inner = self.inner.lock().expect("breaker mutex poisoned");
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => true,
                BreakerState::Open => false,
            }
        };

        if !allow {
            tracing::warn!(breaker = self.name, "circuit breaker open, short-circuiting call");
            return Err(BreakerOpen(self.name));
        }

        let result = f().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        Ok(result)
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = self.name, "circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.fail_count = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(breaker = self.name, "probe failed, circuit breaker re-opened");
            }
            BreakerState::Closed => {
                inner.fail_count += 1;
                if inner.fail_count >= self.fail_max {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = self.name,
                        fail_count = inner.fail_count,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn failing() -> Result<(), &'static str> {
        Err("boom")
    }

    async fn succeeding() -> Result<(), &'static str> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_fail_max_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn short_circuits_without_invoking_call_when_open() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let result = breaker
            .call(move || async move {
                invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(result.is_err());
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let _ = breaker.call(succeeding).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.fail_count(), 0);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_breaker() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        let _ = breaker.call(failing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
