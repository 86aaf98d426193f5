//! Circuit breaker pattern implementation.
//!
//! The circuit breaker stops calling a failing upstream after a run of
//! consecutive failures and gives it a cooldown to recover. After the cooldown a
//! single probe call is admitted; its outcome closes or reopens the circuit.

use crate::error_mapper::is_upstream_fault;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{CorrelationId, GatewayError, GatewayResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Cooldown elapsed, one probe request is admitted
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait in the open state before admitting a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    changed_at: Instant,
    last_transition_at: DateTime<Utc>,
    probe_in_flight: bool,
}

/// How a call was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Circuit breaker for a single upstream
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_failures: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Releases the half-open probe slot if the probe future is dropped before completing
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                changed_at: Instant::now(),
                last_transition_at: Utc::now(),
                probe_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Breaker name (the provider id)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` under the breaker.
    ///
    /// Rejected calls never invoke `operation` and fail with
    /// [`GatewayError::CircuitBreakerOpen`]. Errors that do not reflect upstream
    /// health (validation, credentials, content filtering) are passed through
    /// without counting as failures.
    ///
    /// # Errors
    /// Returns the operation's error, or `CircuitBreakerOpen` when rejected
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        correlation_id: &CorrelationId,
        operation_name: &str,
    ) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let admission = self.admit(correlation_id, operation_name)?;

        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Err(error) if is_upstream_fault(error) => {
                self.record_failure(admission, correlation_id, operation_name);
            }
            _ => self.record_success(admission, correlation_id),
        }
        result
    }

    fn admit(&self, correlation_id: &CorrelationId, operation_name: &str) -> GatewayResult<Admission> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner.changed_at.elapsed();
                if elapsed >= self.config.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen, correlation_id);
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    drop(inner);
                    Err(self.reject(
                        Some(self.config.cooldown.saturating_sub(elapsed)),
                        correlation_id,
                        operation_name,
                    ))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    drop(inner);
                    Err(self.reject(None, correlation_id, operation_name))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn reject(
        &self,
        retry_after: Option<Duration>,
        correlation_id: &CorrelationId,
        operation_name: &str,
    ) -> GatewayError {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        debug!(
            breaker = %self.name,
            correlation_id = %correlation_id,
            operation = operation_name,
            "Circuit breaker rejected call"
        );
        GatewayError::circuit_open(&self.name, retry_after)
    }

    fn record_success(&self, admission: Admission, correlation_id: &CorrelationId) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if admission == Admission::Probe {
            inner.probe_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                self.transition(&mut inner, CircuitState::Closed, correlation_id);
            }
        }
    }

    fn record_failure(&self, admission: Admission, correlation_id: &CorrelationId, operation_name: &str) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if admission == Admission::Probe {
            inner.probe_in_flight = false;
        }

        let state = inner.state;
        match state {
            CircuitState::HalfOpen if admission == Admission::Probe => {
                self.transition(&mut inner, CircuitState::Open, correlation_id);
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                debug!(
                    breaker = %self.name,
                    operation = operation_name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure threshold reached"
                );
                self.transition(&mut inner, CircuitState::Open, correlation_id);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, correlation_id: &CorrelationId) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.changed_at = Instant::now();
        inner.last_transition_at = Utc::now();

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                correlation_id = %correlation_id,
                from = ?from,
                consecutive_failures = inner.consecutive_failures,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                breaker = %self.name,
                correlation_id = %correlation_id,
                "Circuit breaker half-open, admitting probe"
            ),
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                info!(
                    breaker = %self.name,
                    correlation_id = %correlation_id,
                    "Circuit breaker closed"
                );
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        inner.changed_at = Instant::now();
        inner.last_transition_at = Utc::now();
    }

    /// Force the circuit open (manual intervention)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open, &CorrelationId::new("manual"));
    }

    /// Current metrics
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            consecutive_failures: inner.consecutive_failures,
            last_transition_at: inner.last_transition_at,
        }
    }
}

/// Circuit breaker metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Calls submitted, including rejected ones
    pub total_calls: u64,
    /// Calls rejected without invoking upstream
    pub total_rejections: u64,
    /// Calls that failed with an upstream fault
    pub total_failures: u64,
    /// Current run of consecutive failures
    pub consecutive_failures: u32,
    /// When the state last changed
    pub last_transition_at: DateTime<Utc>,
}

/// Named breakers, one per upstream
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers share `config`
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for `name`, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
                .value(),
        )
    }

    /// Get an existing breaker
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Metrics of every breaker, sorted by name
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Close every breaker
    pub fn reset_all(&self) {
        for breaker in &self.breakers {
            breaker.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn cid() -> CorrelationId {
        CorrelationId::new("test")
    }

    async fn fail(cb: &CircuitBreaker) -> GatewayResult<()> {
        cb.execute(|| async { Err(GatewayError::network("reset")) }, &cid(), "create_response")
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> GatewayResult<u32> {
        cb.execute(|| async { Ok(7) }, &cid(), "create_response").await
    }

    fn quick(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "azure",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(20),
            },
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let cb = CircuitBreaker::with_defaults("azure");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let cb = quick(3);
        for _ in 0..3 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let counter = AtomicU32::new(0);
        let invoked = &counter;
        let result = cb
            .execute(
                move || async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                &cid(),
                "create_response",
            )
            .await;

        assert!(matches!(result, Err(GatewayError::CircuitBreakerOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(result.unwrap_err().retry_after().is_some());

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.total_rejections, 1);
        assert_eq!(metrics.total_failures, 3);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = quick(3);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        succeed(&cb).await.unwrap();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_caller_errors_do_not_trip() {
        let cb = quick(1);
        let result: GatewayResult<()> = cb
            .execute(|| async { Err(GatewayError::validation("bad")) }, &cid(), "op")
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let cb = quick(2);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let cb = quick(2);
        fail(&cb).await.ok();
        fail(&cb).await.ok();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(fail(&cb).await, Err(GatewayError::Network { .. })));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&cb).await,
            Err(GatewayError::CircuitBreakerOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_slot() {
        let cb = quick(1);
        fail(&cb).await.ok();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let probe_cid = cid();
        let probe = cb.execute(
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            &probe_cid,
            "op",
        );
        assert!(tokio::time::timeout(Duration::from_millis(10), probe).await.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        });
        let azure = registry.get_or_create("azure");
        let again = registry.get_or_create("azure");
        assert!(Arc::ptr_eq(&azure, &again));
        registry.get_or_create("bedrock");

        fail(&azure).await.ok();
        let snapshot = registry.snapshot_all();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "azure");
        assert_eq!(snapshot[0].state, CircuitState::Open);
        assert_eq!(snapshot[1].state, CircuitState::Closed);

        registry.reset_all();
        assert_eq!(azure.state(), CircuitState::Closed);
        assert!(registry.get("missing").is_none());
    }
}
