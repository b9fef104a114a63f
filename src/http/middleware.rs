//! Request-scoped middleware: client identity, rate limiting, flag gating

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::flags::{EvalContext, FeatureFlagEngine};
use crate::rate_limit::RateLimiter;
use crate::{Error, Result};

/// Validated identity injected by the upstream authentication middleware.
///
/// Issuing and validating sessions is out of scope here; this crate only
/// reads the result.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Stable user id
    pub user_id: String,
    /// User email, when known
    pub email: Option<String>,
    /// Granted roles
    pub roles: Vec<String>,
}

/// Resolve the client identity a rate-limit or violation counter is keyed by.
///
/// Authenticated callers are keyed by user id; anonymous callers by a hash
/// of their first `X-Forwarded-For` hop. This determines fairness
/// granularity: everyone behind one NAT shares an anonymous bucket.
#[must_use]
pub fn resolve_client_id(request: &Request) -> String {
    if let Some(auth) = request.extensions().get::<AuthContext>() {
        return format!("user:{}", auth.user_id);
    }

    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => {
            let digest = Sha256::digest(ip.as_bytes());
            format!("anon:{}", &hex::encode(digest)[..16])
        }
        None => "anon:unknown".to_string(),
    }
}

/// Per-client admission control, installed after the security filter.
///
/// Unprotected routes pass through untouched. A store outage fails open:
/// shedding all traffic because the counter store blinked would be a worse
/// failure than briefly not limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let client = resolve_client_id(&request);

    match limiter.check(&client, &path).await {
        Ok(decision) if decision.allowed => next.run(request).await,
        Ok(decision) => {
            let retry_after = decision.retry_after_secs;
            let mut response = decision.into_error(&path).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        Err(e) => {
            warn!(error = %e, path = %path, "Rate limit check failed, allowing request");
            next.run(request).await
        }
    }
}

/// State for the [`flag_gate_middleware`] guard.
#[derive(Clone)]
pub struct FlagGate {
    engine: Arc<FeatureFlagEngine>,
    flag: String,
}

impl FlagGate {
    /// Gate routes behind `flag`.
    #[must_use]
    pub fn new(engine: Arc<FeatureFlagEngine>, flag: &str) -> Self {
        Self {
            engine,
            flag: flag.to_string(),
        }
    }
}

/// Request guard returning `404` while the flag denies access, so gated
/// surface stays invisible rather than advertising itself with a `403`.
pub async fn flag_gate_middleware(
    State(gate): State<FlagGate>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let auth = request.extensions().get::<AuthContext>();
    let ctx = EvalContext {
        user_id: auth.map(|a| a.user_id.as_str()),
        email: auth.and_then(|a| a.email.as_deref()),
    };

    if gate.engine.is_enabled(&gate.flag, ctx).await {
        Ok(next.run(request).await)
    } else {
        debug!(flag = %gate.flag, "Feature flag denied request");
        Err(Error::FeatureUnavailable(gate.flag.clone()))
    }
}
