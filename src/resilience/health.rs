//! Dependency health classification and aggregation

use serde::Serialize;

use super::circuit_breaker::{BreakerSnapshot, CircuitState};

/// Health of a single tracked dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyHealth {
    /// Circuit closed, failure rate low
    Healthy,
    /// Half-open, or elevated failures still under the threshold
    Degraded,
    /// Circuit open
    Unhealthy,
}

impl DependencyHealth {
    /// Classify a breaker snapshot.
    ///
    /// Closed circuits with a failure count at or past half the threshold
    /// are reported degraded so operators see trouble before the trip.
    #[must_use]
    pub fn classify(snapshot: &BreakerSnapshot) -> Self {
        match snapshot.state {
            CircuitState::Open => Self::Unhealthy,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Closed => {
                if snapshot.failures > 0 && snapshot.failures * 2 >= snapshot.failure_threshold {
                    Self::Degraded
                } else {
                    Self::Healthy
                }
            }
        }
    }

    /// Lowercase name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Per-dependency entry in a health report
#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheck {
    /// Dependency name (`service/operation`)
    pub dependency: String,
    /// Classified health
    pub health: DependencyHealth,
    /// Current circuit state
    pub circuit_state: &'static str,
    /// Rolling failure count
    pub failures: u32,
    /// Calls currently in flight through the gate
    pub in_flight: usize,
}

/// Composite process-wide health report, recomputed on demand
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst classification across all checks
    pub status: DependencyHealth,
    /// Service name
    pub service: String,
    /// Crate version
    pub version: &'static str,
    /// Per-dependency breakdown
    pub checks: Vec<DependencyCheck>,
}

impl HealthReport {
    /// Aggregate checks into a report; status is the worst of its parts.
    #[must_use]
    pub fn aggregate(service: &str, checks: Vec<DependencyCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.health)
            .max()
            .unwrap_or(DependencyHealth::Healthy);

        Self {
            status,
            service: service.to_string(),
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(state: CircuitState, failures: u32, threshold: u32) -> BreakerSnapshot {
        BreakerSnapshot {
            state,
            failures,
            failure_threshold: threshold,
            since_last_failure: None,
        }
    }

    #[test]
    fn open_is_unhealthy() {
        let health = DependencyHealth::classify(&snapshot(CircuitState::Open, 5, 5));
        assert_eq!(health, DependencyHealth::Unhealthy);
    }

    #[test]
    fn half_open_is_degraded() {
        let health = DependencyHealth::classify(&snapshot(CircuitState::HalfOpen, 5, 5));
        assert_eq!(health, DependencyHealth::Degraded);
    }

    #[test]
    fn closed_with_elevated_failures_is_degraded() {
        assert_eq!(
            DependencyHealth::classify(&snapshot(CircuitState::Closed, 0, 5)),
            DependencyHealth::Healthy
        );
        assert_eq!(
            DependencyHealth::classify(&snapshot(CircuitState::Closed, 1, 5)),
            DependencyHealth::Healthy
        );
        assert_eq!(
            DependencyHealth::classify(&snapshot(CircuitState::Closed, 3, 5)),
            DependencyHealth::Degraded
        );
    }

    #[test]
    fn report_status_is_worst_of_parts() {
        let checks = vec![
            DependencyCheck {
                dependency: "a/x".to_string(),
                health: DependencyHealth::Healthy,
                circuit_state: "closed",
                failures: 0,
                in_flight: 0,
            },
            DependencyCheck {
                dependency: "b/y".to_string(),
                health: DependencyHealth::Unhealthy,
                circuit_state: "open",
                failures: 5,
                in_flight: 0,
            },
            DependencyCheck {
                dependency: "c/z".to_string(),
                health: DependencyHealth::Degraded,
                circuit_state: "half_open",
                failures: 5,
                in_flight: 1,
            },
        ];

        let report = HealthReport::aggregate("appointments", checks);
        assert_eq!(report.status, DependencyHealth::Unhealthy);
        assert_eq!(report.checks.len(), 3);
    }

    #[test]
    fn empty_report_is_healthy() {
        let report = HealthReport::aggregate("appointments", Vec::new());
        assert_eq!(report.status, DependencyHealth::Healthy);
    }
}
