//! # Circuit Breaker Implementation
//!
//! Fault isolation for calls to a failing dependency. Three states:
//! Closed (normal operation), Open (failing fast) and HalfOpen (one trial call
//! probes whether the dependency recovered).
//!
//! State, failure count, Open timestamp and the trial flag change together under
//! one lock, so concurrent completions cannot double-open the breaker or admit a
//! second trial. Call counters are lock-free atomics.

use crate::config::ConfigResult;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug, Default)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    half_open_trials: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_trial(&self) {
        self.half_open_trials.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState, consecutive_failures: u32) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures,
            half_open_trials: self.half_open_trials.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - exactly one trial call is allowed
    HalfOpen,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or a half-open trial is in flight), the call was not attempted
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    /// Set on the transition into Open, cleared on close
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Core circuit breaker implementation
///
/// Share one instance (behind an `Arc`) between every call site that talks to
/// the same dependency; the breaker is only useful when it sees the whole
/// failure history.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    inner: Mutex<BreakerState>,

    /// Lock-free atomic metrics
    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    ///
    /// Fails when the threshold or the timeout is zero.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::with_validated_config(name, config))
    }

    /// Construction for configs already checked by [`CircuitBreakerConfig::validate`]
    pub(crate) fn with_validated_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            metrics: AtomicCircuitBreakerMetrics::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// When the breaker last entered Open, if it is open or half-open
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// A rejected call returns [`CircuitBreakerError::CircuitOpen`] without
    /// running `operation` and does not count toward the failure threshold.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        };

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => permit.record_success(duration),
            Err(_) => permit.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Ask to run one call, for callers that record the outcome themselves
    ///
    /// Returns `None` when the call must be rejected. A permit dropped without
    /// recording an outcome frees the half-open trial slot without changing state.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        match self.admit() {
            Some(admission) => Some(CallPermit {
                breaker: self,
                admission,
                resolved: false,
            }),
            None => {
                self.metrics.record_rejection();
                debug!(component = %self.name, "Call rejected by open circuit");
                None
            }
        }
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.timeout => None,
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        self.metrics.record_trial();
                        info!(
                            component = %self.name,
                            "Circuit breaker half-open (testing recovery)"
                        );
                        Some(Admission::Trial)
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    self.metrics.record_trial();
                    Some(Admission::Trial)
                }
            }
        }
    }

    fn complete(&self, admission: Admission, success: bool, duration: Duration) {
        if success {
            self.metrics.record_success(duration);
            debug!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "Operation succeeded"
            );
        } else {
            self.metrics.record_failure(duration);
            warn!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "Operation failed"
            );
        }

        let mut inner = self.inner.lock();
        match (inner.state, admission, success) {
            (CircuitState::Closed, _, true) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, _, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            (CircuitState::HalfOpen, Admission::Trial, true) => {
                self.close(&mut inner);
            }
            (CircuitState::HalfOpen, Admission::Trial, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                self.open(&mut inner);
            }
            (CircuitState::Open, _, false) => {
                // Already open; the timer keeps its original start
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
            // Late completions of calls admitted before a state change
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            debug!(component = %self.name, "Half-open trial abandoned without an outcome");
        }
    }

    /// Transition to open state (failing fast)
    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;

        error!(
            component = %self.name,
            consecutive_failures = inner.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            timeout_seconds = self.config.timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to closed state (normal operation)
    fn close(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;

        info!(
            component = %self.name,
            total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed (recovered)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.close(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self.inner.lock();
            (inner.state, inner.consecutive_failures)
        };
        self.metrics.snapshot(state, consecutive_failures)
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            return true;
        }

        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        (failure_count as f64 / total_calls as f64) < 0.1
    }
}

/// Admission to run one call through a [`CircuitBreaker`]
///
/// Consumed by [`CallPermit::record_success`] or [`CallPermit::record_failure`].
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub fn record_success(mut self, duration: Duration) {
        self.resolved = true;
        self.breaker.complete(self.admission, true, duration);
    }

    pub fn record_failure(mut self, duration: Duration) {
        self.resolved = true;
        self.breaker.complete(self.admission, false, duration);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::new(threshold, timeout)).unwrap()
    }

    async fn fail(circuit: &CircuitBreaker) {
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = breaker(3, Duration::from_millis(100));
        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_consecutive_failures() {
        let circuit = breaker(3, Duration::from_secs(60));

        fail(&circuit).await;
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 2);

        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let circuit = breaker(3, Duration::from_secs(60));
        fail(&circuit).await;
        fail(&circuit).await;
        circuit.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(circuit.consecutive_failures(), 0);
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_operation() {
        let circuit = breaker(1, Duration::from_secs(60));
        fail(&circuit).await;

        let invoked = AtomicUsize::new(0);
        let result = circuit
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("should not execute")
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { ref component }) if component == "test"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let metrics = circuit.metrics();
        assert_eq!(metrics.rejected_count, 1);
        // Rejections never count as failures
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let circuit = breaker(1, Duration::from_millis(50));
        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert!(circuit.opened_at().is_none());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_timer() {
        let circuit = breaker(1, Duration::from_millis(50));
        fail(&circuit).await;
        let first_opened = circuit.opened_at().unwrap();

        sleep(Duration::from_millis(60)).await;
        fail(&circuit).await;

        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.opened_at().unwrap() > first_opened);
        // Fresh timer: immediately rejected again
        assert!(circuit.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_only_one_trial_in_flight() {
        let circuit = Arc::new(breaker(1, Duration::from_millis(20)));
        fail(&circuit).await;
        sleep(Duration::from_millis(30)).await;

        let trial = circuit.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        for _ in 0..5 {
            assert!(circuit.try_acquire().is_none());
        }

        trial.record_success(Duration::from_millis(1));
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_dropped_trial_frees_slot() {
        let circuit = breaker(1, Duration::from_millis(20));
        fail(&circuit).await;
        sleep(Duration::from_millis(30)).await;

        drop(circuit.try_acquire());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(circuit.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_failures_while_open_keep_original_timestamp() {
        let circuit = breaker(2, Duration::from_secs(60));
        let first = circuit.try_acquire().unwrap();
        let second = circuit.try_acquire().unwrap();
        let third = circuit.try_acquire().unwrap();

        first.record_failure(Duration::ZERO);
        second.record_failure(Duration::ZERO);
        let opened_at = circuit.opened_at().unwrap();

        sleep(Duration::from_millis(5)).await;
        third.record_failure(Duration::ZERO);

        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.opened_at(), Some(opened_at));
    }

    #[tokio::test]
    async fn test_force_operations() {
        let circuit = breaker(1, Duration::from_secs(1));

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_healthy());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.is_healthy());
    }

    #[test]
    fn test_rejects_zero_threshold_and_zero_timeout() {
        let zero_threshold = CircuitBreaker::new("test", CircuitBreakerConfig::new(0, Duration::from_secs(1)));
        assert!(matches!(
            zero_threshold,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "failure_threshold"
        ));

        let zero_timeout = CircuitBreaker::new("test", CircuitBreakerConfig::new(1, Duration::ZERO));
        assert!(matches!(
            zero_timeout,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "timeout"
        ));
    }
}
