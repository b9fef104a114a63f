//! Resilience facade: circuit breaking, retry, timeout, concurrency limiting
//!
//! One [`Resilience`] instance per process wraps every protected call in the
//! same pipeline: acquire the concurrency gate, pass the circuit breaker,
//! attempt under a per-attempt deadline, retry on transient failures (the
//! breaker is re-checked before every attempt), and record exactly one
//! breaker outcome per logical call.
//!
//! Breaker and gate state are process-local and in-memory; under horizontal
//! scaling each instance tracks its own view of dependency health. Only the
//! rate limiter and flag cache share state through the counter store.

mod circuit_breaker;
mod concurrency;
mod health;
mod retry;
mod timeout;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use concurrency::ConcurrencyGate;
pub use health::{DependencyCheck, DependencyHealth, HealthReport};
pub use retry::{RetryPolicy, with_retry};
pub use timeout::with_timeout;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::config::ResilienceConfig;
use crate::{Error, Result};

/// Identity of a protected call: `(service, operation)`.
///
/// Circuit state, retry budgets, and concurrency gates are tracked per key;
/// keys never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    /// Downstream service name
    pub service: String,
    /// Operation on that service
    pub operation: String,
}

impl DependencyKey {
    /// Create a key.
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.operation)
    }
}

/// Combined resilience wrapper for outbound calls and handlers.
pub struct Resilience {
    config: ResilienceConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    gates: DashMap<String, Arc<ConcurrencyGate>>,
    http: reqwest::Client,
}

impl Resilience {
    /// Create a facade from configuration.
    #[must_use]
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            gates: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Pre-register a dependency so health reports list it before the first
    /// call.
    pub fn register(&self, key: &DependencyKey) {
        let name = key.to_string();
        self.breaker(&name);
        self.gate(&name);
        debug!(dependency = %name, "Registered dependency");
    }

    /// Run a callable through the full resilience pipeline.
    ///
    /// Composition per logical call: acquire the gate → pass the breaker →
    /// attempt under timeout → retry transient failures (breaker re-checked
    /// before each attempt) → record one breaker outcome → release the gate
    /// by dropping its permit, on every exit path.
    pub async fn call<T, F, Fut>(&self, key: &DependencyKey, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = key.to_string();
        let settings = self.config.settings_for(&name);

        let gate = self.gate(&name);
        let _permit = gate.acquire().await?;

        let breaker = self.breaker(&name);
        breaker.try_acquire()?;

        let policy = RetryPolicy::new(&settings, &self.config.retry);
        let check_breaker = Arc::clone(&breaker);
        let timeout = settings.call_timeout;
        let attempt_name = name.clone();

        let result = with_retry(
            &policy,
            &name,
            move || check_breaker.check(),
            move || with_timeout(attempt_name.clone(), timeout, f()),
        )
        .await;

        // One logical call, one breaker observation. Admission rejections
        // are not observations; a 4xx answer proves the dependency is alive.
        match &result {
            Ok(_) => breaker.record_success(),
            Err(Error::CircuitOpen { .. } | Error::ConcurrencyLimit { .. }) => {}
            Err(e) if e.counts_toward_breaker() => breaker.record_failure(),
            Err(_) => breaker.record_success(),
        }

        result
    }

    /// Ready-made HTTP call through the resilience pipeline.
    ///
    /// Non-2xx answers surface as [`Error::Upstream`]; 5xx count against the
    /// breaker and are retried, 4xx are neither.
    pub async fn safe_api_call(
        &self,
        key: &DependencyKey,
        method: reqwest::Method,
        url: &str,
    ) -> Result<serde_json::Value> {
        let parsed =
            url::Url::parse(url).map_err(|e| Error::Internal(format!("invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Internal(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let client = self.http.clone();
        let dependency = key.to_string();
        let target = parsed.to_string();

        self.call(key, move || {
            let client = client.clone();
            let method = method.clone();
            let url = target.clone();
            let dependency = dependency.clone();
            async move {
                let response = client.request(method, &url).send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(response.json::<serde_json::Value>().await?)
                } else {
                    Err(Error::Upstream {
                        dependency,
                        status: status.as_u16(),
                    })
                }
            }
        })
        .await
    }

    /// Breaker state for one dependency, if it has been registered or called.
    #[must_use]
    pub fn breaker_state(&self, key: &DependencyKey) -> Option<CircuitState> {
        self.breakers.get(&key.to_string()).map(|b| b.state())
    }

    /// Rolling breaker failure count for one dependency.
    #[must_use]
    pub fn failure_count(&self, key: &DependencyKey) -> Option<u32> {
        self.breakers
            .get(&key.to_string())
            .map(|b| b.failure_count())
    }

    /// Per-dependency checks for every tracked key.
    #[must_use]
    pub fn dependency_checks(&self) -> Vec<DependencyCheck> {
        let mut checks: Vec<DependencyCheck> = self
            .breakers
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let snapshot = entry.value().snapshot();
                let in_flight = self.gates.get(&name).map_or(0, |g| g.in_flight());
                DependencyCheck {
                    health: DependencyHealth::classify(&snapshot),
                    circuit_state: snapshot.state.as_str(),
                    failures: snapshot.failures,
                    in_flight,
                    dependency: name,
                }
            })
            .collect();
        checks.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        checks
    }

    /// Composite health report across all tracked dependencies; status is
    /// the worst of its parts.
    #[must_use]
    pub fn health_report(&self, service: &str) -> HealthReport {
        HealthReport::aggregate(service, self.dependency_checks())
    }

    fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, &self.config.settings_for(name)))
            })
            .clone()
    }

    fn gate(&self, name: &str) -> Arc<ConcurrencyGate> {
        self.gates
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.config.settings_for(name);
                Arc::new(ConcurrencyGate::new(
                    name,
                    settings.max_concurrent,
                    settings.mode,
                ))
            })
            .clone()
    }
}
