//! Request security filter
//!
//! An ordered, explicitly-constructed pipeline executed before any handler:
//! origin allow-list → method allow-list → proxy-spoofing header rejection →
//! injection scan over query params (and, for mutating methods, the body).
//! Detected violations consult a short sliding event counter per
//! `(client, violation kind)` on the counter store; past the budget the
//! response escalates from `400` to `429` to slow down active probing.

mod headers;
mod patterns;

pub use headers::security_headers_middleware;
pub use patterns::{ViolationKind, detect_sql_injection, detect_xss_attempt, scan_value};

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::http::middleware::resolve_client_id;
use crate::metrics;
use crate::store::CounterStore;
use crate::{Error, Result};

/// Proxy-spoofing headers rejected outright
const FORBIDDEN_HEADERS: [&str; 2] = ["x-original-url", "x-rewrite-url"];

/// Ingress-forwarded client certificate header (Envoy XFCC convention)
const CLIENT_CERT_HEADER: &str = "x-forwarded-client-cert";

/// The request security filter shared by all routes.
pub struct SecurityFilter {
    config: SecurityConfig,
    store: Arc<dyn CounterStore>,
    max_body_size: usize,
}

impl SecurityFilter {
    /// Create a filter over the given store.
    #[must_use]
    pub fn new(config: SecurityConfig, store: Arc<dyn CounterStore>, max_body_size: usize) -> Self {
        Self {
            config,
            store,
            max_body_size,
        }
    }

    /// Whether the filter is active at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether a path serves interactive API docs (relaxed CSP).
    #[must_use]
    pub fn is_docs_path(&self, path: &str) -> bool {
        self.config.docs_paths.iter().any(|p| path.starts_with(p))
    }

    /// Validate `Origin` against the allow-list.
    ///
    /// Absent `Origin` (non-browser callers) passes. An empty allow-list
    /// admits every origin. `*.domain` entries match the apex and any
    /// subdomain.
    fn check_origin(&self, request: &Request) -> std::result::Result<(), ViolationKind> {
        let Some(origin) = request
            .headers()
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(());
        };

        if self.config.allowed_origins.is_empty() {
            return Ok(());
        }

        let host = url::Url::parse(origin)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        let allowed = self.config.allowed_origins.iter().any(|entry| {
            if entry == "*" {
                true
            } else if let Some(suffix) = entry.strip_prefix("*.") {
                host.as_deref()
                    .is_some_and(|h| h == suffix || h.ends_with(&format!(".{suffix}")))
            } else {
                entry.trim_end_matches('/') == origin.trim_end_matches('/')
            }
        });

        if allowed {
            Ok(())
        } else {
            Err(ViolationKind::ForbiddenOrigin)
        }
    }

    fn check_method(&self, method: &Method) -> std::result::Result<(), ViolationKind> {
        if self
            .config
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
        {
            Ok(())
        } else {
            Err(ViolationKind::MethodNotAllowed)
        }
    }

    fn check_headers(&self, request: &Request) -> std::result::Result<(), ViolationKind> {
        for name in FORBIDDEN_HEADERS {
            if request.headers().contains_key(name) {
                return Err(ViolationKind::SpoofedHeader);
            }
        }
        Ok(())
    }

    fn scan_query(&self, request: &Request) -> std::result::Result<(), ViolationKind> {
        let Some(query) = request.uri().query() else {
            return Ok(());
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if let Some(kind) = scan_value(&key).or_else(|| scan_value(&value)) {
                return Err(kind);
            }
        }
        Ok(())
    }

    /// Run the whole pipeline over a request, buffering the body of
    /// mutating methods for the injection scan. Returns the (rebuilt)
    /// request on a clean pass.
    async fn inspect(&self, request: Request) -> std::result::Result<Request, ViolationKind> {
        self.check_origin(&request)?;
        self.check_method(request.method())?;
        self.check_headers(&request)?;
        self.scan_query(&request)?;

        let mutating = matches!(
            *request.method(),
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        if !mutating {
            return Ok(request);
        }

        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|_| ViolationKind::OversizedBody)?;

        let text = String::from_utf8_lossy(&bytes);
        if let Some(kind) = scan_value(&text) {
            return Err(kind);
        }

        Ok(Request::from_parts(parts, Body::from(bytes)))
    }

    /// Count a violation against the client's 60-second budget; past the
    /// budget the caller gets throttled instead of a plain rejection.
    async fn throttle(&self, client: &str, kind: ViolationKind) -> Result<bool> {
        let key = format!("sec:{client}:{}", kind.as_str());
        let count = self
            .store
            .incr_with_expiry(&key, self.config.violation_window)
            .await?;
        Ok(count > self.config.violation_budget)
    }

    /// Build the rejection for a detected violation.
    async fn reject(&self, client: &str, kind: ViolationKind, path: &str) -> Error {
        metrics::security_violation(kind.as_str(), path);

        let throttled = match self.throttle(client, kind).await {
            Ok(throttled) => throttled,
            Err(e) => {
                // Store outage must not let probes through unthrottled,
                // but it also must not escalate honest mistakes.
                warn!(error = %e, "Violation counter unavailable");
                false
            }
        };

        warn!(
            client = %client,
            violation = kind.as_str(),
            path = %path,
            throttled,
            "Request rejected by security filter"
        );

        Error::SecurityViolation {
            kind: kind.as_str().to_string(),
            throttled,
        }
    }
}

/// Request-scoped security middleware, installed before the rate limiter.
pub async fn security_filter_middleware(
    State(filter): State<Arc<SecurityFilter>>,
    request: Request,
    next: Next,
) -> Response {
    if !filter.enabled() {
        return next.run(request).await;
    }

    if request.headers().contains_key(CLIENT_CERT_HEADER) {
        metrics::mtls_connection_attempt();
    }

    let client = resolve_client_id(&request);
    let path = request.uri().path().to_string();

    match filter.inspect(request).await {
        Ok(request) => {
            debug!(path = %path, "Security filter passed");
            next.run(request).await
        }
        Err(kind) => filter.reject(&client, kind, &path).await.into_response(),
    }
}
