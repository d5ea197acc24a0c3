use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::data_source::{SourceError, SourceErrorKind};
use crate::{SourceId, UtcDateTime};

/// Runtime circuit state for source adapter upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Point-in-time view of a breaker, used for health output and weighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<UtcDateTime>,
    pub last_success_at: Option<UtcDateTime>,
}

impl CircuitSnapshot {
    /// Completed-call success rate; 1.0 before any call completes.
    pub fn success_rate(&self) -> f64 {
        let completed = self.total_successes + self.total_failures;
        if completed == 0 {
            return 1.0;
        }
        self.total_successes as f64 / completed as f64
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<UtcDateTime>,
    last_success_at: Option<UtcDateTime>,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            rejected_calls: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

impl CircuitInner {
    fn recovery_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.last_failure
            .map(|at| at.elapsed() >= recovery_timeout)
            .unwrap_or(true)
    }
}

/// Thread-safe circuit breaker guarding one upstream source.
///
/// Each source owns exactly one breaker, so the lock never spans providers.
#[derive(Debug)]
pub struct CircuitBreaker {
    source: SourceId,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(source: SourceId, config: CircuitBreakerConfig) -> Self {
        Self {
            source,
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits or rejects the next call. An open breaker whose recovery
    /// timeout has elapsed moves to half-open here, before the call runs.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        inner.total_calls = inner.total_calls.saturating_add(1);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.recovery_elapsed(self.config.recovery_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(source = %self.source, "circuit half-open, probing upstream");
                    true
                } else {
                    inner.rejected_calls = inner.rejected_calls.saturating_add(1);
                    false
                }
            }
        }
    }

    /// Whether the next call would be admitted, without changing state.
    pub fn is_eligible(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => inner.recovery_elapsed(self.config.recovery_timeout),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes = inner.total_successes.saturating_add(1);
        inner.last_success_at = Some(UtcDateTime::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(source = %self.source, "circuit closed after successful probes");
                }
            }
            // late completion of a call admitted before the breaker opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures = inner.total_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(UtcDateTime::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        source = %self.source,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(source = %self.source, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `op` through the breaker, failing fast with `CircuitOpen` when the
    /// breaker rejects the call.
    ///
    /// An `InvalidRequest` answer proves the upstream is reachable, so it is
    /// recorded as a success for breaker purposes. Local errors such as an
    /// exhausted quota are recorded as neither.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        if !self.allow_request() {
            return Err(SourceError::circuit_open(&self.source));
        }

        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(error) if error.kind() == SourceErrorKind::InvalidRequest => self.record_success(),
            Err(error) if error.is_local() => {}
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Operator escape hatch: force the breaker closed and clear counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        info!(source = %self.source, "circuit manually reset");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            SourceId::parse("test").expect("valid id"),
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: Duration::from_millis(recovery_ms),
                success_threshold,
            },
        )
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(2, 10_000, 1);

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert!(!breaker.is_eligible());
        assert_eq!(breaker.snapshot().rejected_calls, 1);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let breaker = breaker(3, 10_000, 1);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn half_open_needs_consecutive_successes_to_close() {
        let breaker = breaker(1, 1, 3);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.is_eligible());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = breaker(1, 1, 3);

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let breaker = breaker(1, 60_000, 1);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn snapshot_reports_success_rate() {
        let breaker = breaker(10, 60_000, 1);
        assert_eq!(breaker.snapshot().success_rate(), 1.0);

        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.total_successes, 3);
        assert_eq!(snapshot.total_failures, 1);
        assert!((snapshot.success_rate() - 0.75).abs() < f64::EPSILON);
        assert!(snapshot.last_failure_at.is_some());
        assert!(snapshot.last_success_at.is_some());
    }

    #[tokio::test]
    async fn call_fails_fast_when_open() {
        let breaker = breaker(1, 60_000, 1);
        let first: Result<(), SourceError> =
            breaker.call(|| async { Err(SourceError::upstream("boom")) }).await;
        assert!(first.is_err());

        let mut invoked = false;
        let second: Result<(), SourceError> = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;

        assert!(!invoked, "wrapped function must not run while open");
        assert_eq!(
            second.expect_err("open").kind(),
            SourceErrorKind::CircuitOpen
        );
    }

    #[tokio::test]
    async fn invalid_request_does_not_trip_breaker() {
        let breaker = breaker(1, 60_000, 1);
        let result: Result<(), SourceError> = breaker
            .call(|| async { Err(SourceError::invalid_request("unknown entity")) })
            .await;

        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn local_quota_rejections_are_not_counted() {
        let breaker = breaker(1, 60_000, 1);
        for _ in 0..3 {
            let result: Result<(), SourceError> = breaker
                .call(|| async { Err(SourceError::quota_exhausted("quota spent")) })
                .await;
            assert_eq!(result.expect_err("local").kind(), SourceErrorKind::RateLimited);
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.total_failures, 0);
        assert_eq!(snapshot.failure_count, 0);
    }
}
