//! Circuit breaker implementation

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::DependencySettings;
use crate::metrics;
use crate::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (allowing a single probe request)
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name used in logs, metrics labels, and health reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker protecting one dependency.
///
/// Admission and state transitions happen under a single per-key lock so
/// concurrent callers observe a consistent state machine; unrelated
/// dependencies never contend on it.
pub struct CircuitBreaker {
    /// Dependency name (`service/operation`)
    name: String,
    enabled: bool,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    /// Set while the single half-open trial call is in flight
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker, used by the health aggregator.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Rolling failure count
    pub failures: u32,
    /// Configured failure threshold
    pub failure_threshold: u32,
    /// Time since the last recorded failure
    pub since_last_failure: Option<Duration>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: &str, settings: &DependencySettings) -> Self {
        Self {
            name: name.to_string(),
            enabled: settings.breaker_enabled,
            failure_threshold: settings.failure_threshold,
            cooldown: settings.cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Admit or reject a logical call.
    ///
    /// While `Open`, callers fail fast with [`Error::CircuitOpen`] until the
    /// cooldown elapses; then exactly one caller is admitted as the
    /// half-open probe and everyone else keeps failing fast until the probe
    /// outcome is recorded.
    pub fn try_acquire(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= self.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    debug!(dependency = %self.name, "Cooldown elapsed, admitting half-open probe");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        dependency: self.name.clone(),
                        retry_after: self.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::CircuitOpen {
                        dependency: self.name.clone(),
                        retry_after: self.cooldown,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Non-admitting check used between retry attempts.
    ///
    /// Fails with [`Error::CircuitOpen`] while the circuit is open and
    /// cooling down; never consumes the half-open probe slot.
    pub fn check(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
            if elapsed < self.cooldown {
                return Err(Error::CircuitOpen {
                    dependency: self.name.clone(),
                    retry_after: self.cooldown - elapsed,
                });
            }
        }
        Ok(())
    }

    /// True while the circuit is open and cooling down.
    #[must_use]
    pub fn is_open(&self) -> bool {
        if !self.enabled {
            return false;
        }

        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_none_or(|at| at.elapsed() < self.cooldown)
    }

    /// Record the outcome of one admitted logical call: success.
    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                debug!(dependency = %self.name, "Half-open probe succeeded");
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Open => {
                // Late success from a call admitted before the trip; ignored.
            }
        }
    }

    /// Record the outcome of one admitted logical call: failure.
    pub fn record_failure(&self) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                warn!(
                    dependency = %self.name,
                    failures = inner.failures,
                    threshold = self.failure_threshold,
                    "Dependency call failed"
                );
                if inner.failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(dependency = %self.name, "Half-open probe failed, reopening circuit");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                // Late failure from a call admitted before the trip; ignored.
            }
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Rolling failure count
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Snapshot for health classification
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            failure_threshold: self.failure_threshold,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    /// Transition to a new state. Caller holds the lock.
    fn transition(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }

        inner.state = new_state;
        metrics::circuit_state_change(&self.name, new_state.as_str());

        match new_state {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.opened_at = None;
                info!(dependency = %self.name, "Circuit breaker closed");
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                warn!(
                    dependency = %self.name,
                    failures = inner.failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                debug!(dependency = %self.name, "Circuit breaker half-open");
            }
        }
    }
}
