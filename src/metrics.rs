//! Metric definitions and recording helpers
//!
//! Uses the `metrics` facade; the Prometheus recorder is installed once at
//! startup (behind the `metrics` cargo feature) and its handle is passed
//! into the HTTP state for `GET /metrics` rendering, so components never
//! reach for a hidden global registry.
//!
//! Exported series:
//! - `security_violations_total{kind, path}` (counter)
//! - `security_header_seconds` (histogram): security-header processing latency
//! - `mtls_connection_attempts_total` (counter): requests carrying an
//!   ingress-forwarded client certificate header
//! - `rate_limit_rejections_total{route}` (counter)
//! - `circuit_state_changes_total{dependency, state}` (counter)

use telemetry_metrics::{counter, describe_counter, describe_histogram, histogram};

/// Security violations by kind and request path
pub const SECURITY_VIOLATIONS: &str = "security_violations_total";
/// Security-header processing latency in seconds
pub const SECURITY_HEADER_SECONDS: &str = "security_header_seconds";
/// Requests arriving with an ingress-forwarded client certificate
pub const MTLS_CONNECTION_ATTEMPTS: &str = "mtls_connection_attempts_total";
/// Requests rejected by the rate limiter, by route
pub const RATE_LIMIT_REJECTIONS: &str = "rate_limit_rejections_total";
/// Circuit breaker state transitions, by dependency and new state
pub const CIRCUIT_STATE_CHANGES: &str = "circuit_state_changes_total";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        SECURITY_VIOLATIONS,
        "Requests rejected by the security filter, by violation kind and path"
    );
    describe_histogram!(
        SECURITY_HEADER_SECONDS,
        "Time spent applying response security headers"
    );
    describe_counter!(
        MTLS_CONNECTION_ATTEMPTS,
        "Requests carrying an ingress-forwarded client certificate header"
    );
    describe_counter!(
        RATE_LIMIT_REJECTIONS,
        "Requests rejected by the rate limiter, by route"
    );
    describe_counter!(
        CIRCUIT_STATE_CHANGES,
        "Circuit breaker state transitions, by dependency and new state"
    );
}

/// Record a security violation.
pub fn security_violation(kind: &str, path: &str) {
    counter!(
        SECURITY_VIOLATIONS,
        "kind" => kind.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

/// Record security-header processing latency.
pub fn security_header_latency(seconds: f64) {
    histogram!(SECURITY_HEADER_SECONDS).record(seconds);
}

/// Record an mTLS-authenticated connection attempt seen at the ingress.
pub fn mtls_connection_attempt() {
    counter!(MTLS_CONNECTION_ATTEMPTS).increment(1);
}

/// Record a rate limit rejection.
pub fn rate_limit_rejection(route: &str) {
    counter!(RATE_LIMIT_REJECTIONS, "route" => route.to_string()).increment(1);
}

/// Record a circuit breaker state change.
pub fn circuit_state_change(dependency: &str, state: &'static str) {
    counter!(
        CIRCUIT_STATE_CHANGES,
        "dependency" => dependency.to_string(),
        "state" => state
    )
    .increment(1);
}

/// Install the Prometheus recorder and return its render handle.
#[cfg(feature = "metrics")]
pub fn install_prometheus() -> crate::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| crate::Error::Config(format!("Failed to install metrics recorder: {e}")))?;
    describe_metrics();
    Ok(handle)
}
