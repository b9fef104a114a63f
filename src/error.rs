//! Error types for the control plane

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

/// Control plane errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Circuit breaker is open for a dependency
    #[error("Circuit open for {dependency}, retry in {retry_after:?}")]
    CircuitOpen {
        /// Dependency the breaker protects
        dependency: String,
        /// Time until the next half-open probe is admitted
        retry_after: Duration,
    },

    /// A dependency call exceeded its per-attempt deadline
    #[error("Timeout after {timeout:?} calling {dependency}")]
    DependencyTimeout {
        /// Dependency that timed out
        dependency: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Concurrency gate rejected the call (reject mode, at capacity)
    #[error("Concurrency limit reached for {dependency}")]
    ConcurrencyLimit {
        /// Dependency whose gate is saturated
        dependency: String,
    },

    /// A rate limit window was exceeded
    #[error("Rate limit exceeded on {route}")]
    RateLimitExceeded {
        /// Route the limit applies to
        route: String,
        /// Requests seen in the current minute window
        minute: u64,
        /// Requests seen in the current hour window
        hour: u64,
        /// Requests seen in the current day window, when configured
        day: Option<u64>,
        /// Seconds until the smallest exceeded window rolls over
        retry_after_secs: u64,
    },

    /// Request failed the security filter
    #[error("Security violation: {kind}")]
    SecurityViolation {
        /// Violation kind (stable identifier, e.g. `sql_injection`)
        kind: String,
        /// True once the per-client violation budget is exhausted
        throttled: bool,
    },

    /// A feature flag gate denied access
    #[error("Feature not available: {0}")]
    FeatureUnavailable(String),

    /// Upstream dependency answered with a non-2xx status
    #[error("Upstream {dependency} returned status {status}")]
    Upstream {
        /// Dependency that answered
        dependency: String,
        /// HTTP status code it returned
        status: u16,
    },

    /// Shared counter store error
    #[error("Counter store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Outbound HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error code, part of the wire contract.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::DependencyTimeout { .. } => "dependency_timeout",
            Self::ConcurrencyLimit { .. } => "concurrency_limit",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::SecurityViolation { .. } => "security_violation",
            Self::FeatureUnavailable(_) => "feature_unavailable",
            Self::Upstream { .. } => "upstream_error",
            Self::Store(_) => "store_error",
            Self::Http(_) => "http_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "invalid_json",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status this error surfaces as at the service boundary.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CircuitOpen { .. } | Self::ConcurrencyLimit { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DependencyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::SecurityViolation { throttled, .. } => {
                if *throttled {
                    StatusCode::TOO_MANY_REQUESTS
                } else {
                    StatusCode::BAD_REQUEST
                }
            }
            Self::FeatureUnavailable(_) => StatusCode::NOT_FOUND,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the resilience facade may re-attempt the call.
    ///
    /// Transport failures, timeouts, store I/O, and upstream 5xx are
    /// transient; everything else (validation, 4xx, admission rejections)
    /// is surfaced immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DependencyTimeout { .. } | Self::Http(_) | Self::Io(_) | Self::Store(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this outcome counts as a failure against the circuit breaker.
    ///
    /// Admission rejections never count (the dependency was not called),
    /// and a 4xx answer proves the dependency is alive.
    #[must_use]
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::CircuitOpen { .. }
            | Self::ConcurrencyLimit { .. }
            | Self::RateLimitExceeded { .. }
            | Self::SecurityViolation { .. }
            | Self::FeatureUnavailable(_) => false,
            Self::Upstream { status, .. } => *status >= 500,
            _ => true,
        }
    }
}

impl IntoResponse for Error {
    /// Render the structured JSON error body.
    ///
    /// Callers always receive `{"error": {"code", "message", ...}}`; raw
    /// error chains never cross the service boundary.
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal error classes are logged server-side and redacted on the
        // wire; client-caused errors keep their display message.
        let message = match &self {
            Self::Store(_) | Self::Io(_) | Self::Internal(_) | Self::Http(_) => {
                tracing::error!(error = %self, code = self.error_code(), "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": {
                "code": self.error_code(),
                "message": message,
            }
        });

        match &self {
            Self::RateLimitExceeded {
                minute,
                hour,
                day,
                retry_after_secs,
                ..
            } => {
                body["error"]["minute_count"] = json!(minute);
                body["error"]["hour_count"] = json!(hour);
                if let Some(day) = day {
                    body["error"]["day_count"] = json!(day);
                }
                body["error"]["retry_after_secs"] = json!(retry_after_secs);
            }
            Self::CircuitOpen { retry_after, .. } => {
                body["error"]["retry_after_secs"] = json!(retry_after.as_secs());
            }
            Self::SecurityViolation { kind, .. } => {
                body["error"]["violation"] = json!(kind);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
