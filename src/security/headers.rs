//! Response security headers
//!
//! Appended to every response by a global middleware layer. Interactive API
//! documentation routes get a relaxed CSP so their inline scripts keep
//! working; everything else gets the strict policy.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;

use super::SecurityFilter;
use crate::metrics;

const STRICT_CSP: &str = "default-src 'none'; frame-ancestors 'none'; base-uri 'none'";
const DOCS_CSP: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline'; img-src 'self' data:";
const HSTS: &str = "max-age=63072000; includeSubDomains";
const PERMISSIONS_POLICY: &str = "geolocation=(), camera=(), microphone=(), payment=()";

/// Append security headers to a response.
pub fn apply_security_headers(response: &mut Response, relaxed_csp: bool) {
    let headers = response.headers_mut();

    let csp = if relaxed_csp { DOCS_CSP } else { STRICT_CSP };
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(csp),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
}

/// Global middleware appending security headers to every response.
pub async fn security_headers_middleware(
    State(filter): State<Arc<SecurityFilter>>,
    request: Request,
    next: Next,
) -> Response {
    let relaxed_csp = filter.is_docs_path(request.uri().path());
    let mut response = next.run(request).await;

    let start = Instant::now();
    apply_security_headers(&mut response, relaxed_csp);
    metrics::security_header_latency(start.elapsed().as_secs_f64());

    response
}
