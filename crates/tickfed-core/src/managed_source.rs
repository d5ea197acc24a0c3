//! Fault-tolerant wrapper around a [`DataSource`] adapter.
//!
//! Composition per call, outermost first:
//!
//! ```text
//! RetryPolicy ─▶ CircuitBreaker ─▶ RateBudget ─▶ per-attempt timeout ─▶ DataSource::fetch
//! ```
//!
//! The wrapper is also the single writer of the source's reliability window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::data_source::{DataSource, FetchRequest, SourceError};
use crate::reliability::ReliabilityWindow;
use crate::retry::RetryPolicy;
use crate::throttling::RateBudget;
use crate::{EntityKey, FieldMap, FieldSet, Priority, ProviderResult, SourceId, UtcDateTime};

/// Operator settings for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub priority: Priority,
    pub timeout: Duration,
    pub enabled: bool,
    pub quota_per_minute: Option<u32>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            priority: Priority::MIN,
            timeout: Duration::from_secs(5),
            enabled: true,
            quota_per_minute: None,
        }
    }
}

/// Health row exposed through the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub source_id: SourceId,
    pub state: CircuitState,
    pub success_rate: f64,
    pub total_calls: u64,
    pub reliability_weight: f64,
    pub consecutive_failures: u32,
    pub priority: u8,
    pub enabled: bool,
    pub last_failure_at: Option<UtcDateTime>,
    pub last_success_at: Option<UtcDateTime>,
}

/// A data source together with its breaker, retry policy, rate budget and
/// reliability history.
pub struct ManagedSource {
    id: SourceId,
    source: Arc<dyn DataSource>,
    settings: SourceSettings,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    reliability: ReliabilityWindow,
    budget: Option<RateBudget>,
}

impl std::fmt::Debug for ManagedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSource")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("state", &self.breaker.state())
            .finish()
    }
}

impl ManagedSource {
    pub fn new(
        source: Arc<dyn DataSource>,
        settings: SourceSettings,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
        reliability_window: usize,
    ) -> Self {
        let id = source.id();
        let budget = settings.quota_per_minute.map(RateBudget::per_minute);
        Self {
            breaker: CircuitBreaker::new(id.clone(), breaker),
            id,
            source,
            settings,
            retry,
            reliability: ReliabilityWindow::new(reliability_window),
            budget,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.settings.priority
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Rolling success ratio of completed calls, in [0, 1].
    pub fn reliability_weight(&self) -> f64 {
        self.reliability.weight()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Enabled and not held open by its breaker.
    pub fn is_eligible(&self) -> bool {
        self.settings.enabled && self.breaker.is_eligible()
    }

    /// Fetches through retry, breaker, budget and timeout. Never fails: the
    /// outcome is always a [`ProviderResult`], successful or not.
    #[instrument(skip(self, fields), fields(source = %self.id, entity = %entity))]
    pub async fn fetch(&self, entity: &EntityKey, fields: &FieldSet) -> ProviderResult {
        let started = Instant::now();
        let request = FetchRequest::new(entity.clone(), fields.clone());

        let outcome = self
            .retry
            .run(&self.breaker, || {
                let request = request.clone();
                async move { self.attempt(request).await }
            })
            .await;

        let latency = started.elapsed();
        match outcome {
            Ok(raw) => {
                self.reliability.record(true);
                let fields = retain_requested(raw, fields);
                debug!(
                    fields = fields.len(),
                    latency_ms = latency.as_millis() as u64,
                    "source fetch succeeded"
                );
                ProviderResult::succeeded(self.id.clone(), fields, latency)
            }
            Err(error) => {
                if !error.is_local() {
                    self.reliability.record(false);
                }
                warn!(
                    error = %error,
                    latency_ms = latency.as_millis() as u64,
                    "source fetch failed"
                );
                ProviderResult::failed(self.id.clone(), error.kind(), latency)
            }
        }
    }

    async fn attempt(&self, request: FetchRequest) -> Result<FieldMap, SourceError> {
        if let Some(budget) = &self.budget {
            if let Err(wait) = budget.try_acquire() {
                return Err(SourceError::quota_exhausted(format!(
                    "local quota of {} calls/min exhausted, next slot in {}ms",
                    budget.limit(),
                    wait.as_millis()
                )));
            }
        }

        match tokio::time::timeout(self.settings.timeout, self.source.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::upstream_timeout(format!(
                "no answer within {}ms",
                self.settings.timeout.as_millis()
            ))),
        }
    }

    pub fn health(&self) -> ProviderHealth {
        let snapshot = self.breaker.snapshot();
        ProviderHealth {
            source_id: self.id.clone(),
            state: snapshot.state,
            success_rate: snapshot.success_rate(),
            total_calls: snapshot.total_calls,
            reliability_weight: self.reliability.weight(),
            consecutive_failures: snapshot.failure_count,
            priority: self.settings.priority.get(),
            enabled: self.settings.enabled,
            last_failure_at: snapshot.last_failure_at,
            last_success_at: snapshot.last_success_at,
        }
    }
}

fn retain_requested(raw: FieldMap, requested: &FieldSet) -> FieldMap {
    raw.into_iter()
        .filter(|(name, value)| requested.contains(name) && value.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::data_source::{SourceErrorKind, SourceFuture};
    use crate::FieldValue;

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
        delay: Duration,
    }

    impl DataSource for Flaky {
        fn id(&self) -> SourceId {
            SourceId::parse("flaky").expect("valid id")
        }

        fn fetch<'a>(&'a self, _request: FetchRequest) -> SourceFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures_before_success {
                    return Err(SourceError::upstream("transient"));
                }
                let mut fields = FieldMap::new();
                fields.insert(String::from("price"), FieldValue::Number(10.0));
                fields.insert(String::from("volume"), FieldValue::Number(5.0));
                fields.insert(String::from("bad"), FieldValue::Number(f64::NAN));
                Ok(fields)
            })
        }
    }

    fn managed(source: Flaky, settings: SourceSettings) -> ManagedSource {
        ManagedSource::new(
            Arc::new(source),
            settings,
            CircuitBreakerConfig::default(),
            RetryPolicy::fixed(Duration::from_millis(1), 2),
            10,
        )
    }

    fn request() -> (EntityKey, FieldSet) {
        (
            EntityKey::parse("aapl").expect("valid entity"),
            FieldSet::parse(["price", "bad"]).expect("valid fields"),
        )
    }

    #[tokio::test]
    async fn retries_then_keeps_only_requested_finite_fields() {
        let source = managed(
            Flaky {
                failures_before_success: 1,
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            },
            SourceSettings::default(),
        );
        let (entity, fields) = request();

        let result = source.fetch(&entity, &fields).await;

        assert!(result.success);
        assert_eq!(result.fields.len(), 1);
        assert_eq!(result.fields.get("price"), Some(&FieldValue::Number(10.0)));
        assert_eq!(source.reliability_weight(), 1.0);
        assert_eq!(source.health().total_calls, 2);
    }

    #[tokio::test]
    async fn per_attempt_timeout_becomes_failed_result() {
        let source = managed(
            Flaky {
                failures_before_success: 0,
                calls: AtomicU32::new(0),
                delay: Duration::from_millis(200),
            },
            SourceSettings {
                timeout: Duration::from_millis(10),
                ..SourceSettings::default()
            },
        );
        let (entity, fields) = request();

        let result = source.fetch(&entity, &fields).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(SourceErrorKind::RetryExhausted));
        assert_eq!(source.reliability_weight(), 0.0);
    }

    #[tokio::test]
    async fn exhausted_quota_fails_locally_without_tripping_the_breaker() {
        let source = ManagedSource::new(
            Arc::new(Flaky {
                failures_before_success: 0,
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }),
            SourceSettings {
                quota_per_minute: Some(1),
                ..SourceSettings::default()
            },
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
            RetryPolicy::fixed(Duration::from_millis(1), 3),
            10,
        );
        let (entity, fields) = request();

        assert!(source.fetch(&entity, &fields).await.success);
        let second = source.fetch(&entity, &fields).await;
        let third = source.fetch(&entity, &fields).await;

        assert!(!second.success);
        assert!(!third.success);
        assert_eq!(second.error, Some(SourceErrorKind::RetryExhausted));
        assert_eq!(source.breaker().state(), CircuitState::Closed);
        assert!(source.is_eligible());
        assert_eq!(source.health().consecutive_failures, 0);
        assert!((source.reliability_weight() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_sources_are_not_eligible() {
        let source = managed(
            Flaky {
                failures_before_success: 0,
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            },
            SourceSettings {
                enabled: false,
                ..SourceSettings::default()
            },
        );

        assert!(!source.is_eligible());
        assert!(!source.health().enabled);
    }
}
