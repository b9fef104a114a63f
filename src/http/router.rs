//! HTTP router, control endpoints, and the ordered middleware chain

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::middleware::rate_limit_middleware;
use crate::config::{Config, StoreBackend};
use crate::flags::{FeatureFlagEngine, FlagDefinition};
use crate::rate_limit::RateLimiter;
use crate::resilience::{DependencyHealth, Resilience};
use crate::security::{SecurityFilter, security_filter_middleware, security_headers_middleware};
use crate::store::{CounterStore, MemoryStore, RedisStore};
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Loaded configuration
    pub config: Config,
    /// Shared counter store
    pub store: Arc<dyn CounterStore>,
    /// Resilience facade
    pub resilience: Arc<Resilience>,
    /// Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Feature flag engine
    pub flags: Arc<FeatureFlagEngine>,
    /// Security filter
    pub security: Arc<SecurityFilter>,
    /// Prometheus render handle, set once the recorder is installed
    #[cfg(feature = "metrics")]
    pub prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    /// Build the full control-plane state from configuration: connect the
    /// store, register rate-limit rules, and bootstrap flags.
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let store: Arc<dyn CounterStore> = match config.store.backend {
            StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store).await?),
            StoreBackend::Memory => {
                info!("Using in-memory counter store (single-instance mode)");
                Arc::new(MemoryStore::new())
            }
        };

        let resilience = Arc::new(Resilience::new(config.resilience.clone()));

        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&store),
            config.rate_limit.enabled,
        ));
        for rule in &config.rate_limit.rules {
            rate_limiter.register(rule.clone());
        }

        let flags = Arc::new(FeatureFlagEngine::new(
            Arc::clone(&store),
            &config.flags,
            &config.service.environment,
        ));
        flags.bootstrap(&config.flags).await?;

        let security = Arc::new(SecurityFilter::new(
            config.security.clone(),
            Arc::clone(&store),
            config.server.max_body_size,
        ));

        Ok(Arc::new(Self {
            config,
            store,
            resilience,
            rate_limiter,
            flags,
            security,
            #[cfg(feature = "metrics")]
            prometheus: None,
        }))
    }

    /// Install the ordered control-plane chain around a router.
    ///
    /// Evaluation order per request: request-id → trace → compression →
    /// panic guard → security headers → security filter (origin, method,
    /// spoof headers, injection scan) → rate limit → handler. The order is
    /// constructed here, once, instead of emerging from decorator stacking.
    #[must_use]
    pub fn apply_control_layers(self: &Arc<Self>, router: Router) -> Router {
        router
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.rate_limiter),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.security),
                security_filter_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.security),
                security_headers_middleware,
            ))
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}

/// Create the control-plane router: health, readiness, metrics, and the
/// flags admin surface.
pub fn control_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/flags", get(list_flags_handler))
        .route(
            "/admin/flags/{name}",
            axum::routing::put(put_flag_handler).delete(delete_flag_handler),
        )
        .with_state(state)
}

/// Health check handler
///
/// Status is the worst classification across tracked dependencies;
/// `unhealthy` surfaces as 503 so load balancers rotate the instance out.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.resilience.health_report(&state.config.service.name);

    let status = if report.status == DependencyHealth::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(serde_json::to_value(&report).unwrap_or(json!({}))))
}

/// Readiness handler
///
/// Only counter store unavailability fails readiness outright; an open
/// circuit marks its dependency "not ready" in the body but the instance
/// can still serve unaffected routes.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ready = state.store.ping().await.is_ok();

    let mut dependencies = serde_json::Map::new();
    dependencies.insert(
        "counter_store".to_string(),
        json!(if store_ready { "ready" } else { "not ready" }),
    );
    for check in state.resilience.dependency_checks() {
        let ready = check.health != DependencyHealth::Unhealthy;
        dependencies.insert(
            check.dependency,
            json!(if ready { "ready" } else { "not ready" }),
        );
    }

    let status = if store_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store_ready { "ready" } else { "not ready" },
            "dependencies": Value::Object(dependencies),
        })),
    )
}

/// Prometheus exposition handler
#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n",
        )
            .into_response(),
    }
}

#[cfg(not(feature = "metrics"))]
async fn metrics_handler(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "metrics disabled at build time\n")
}

/// GET /admin/flags
async fn list_flags_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let flags = state.flags.list_flags().await?;
    Ok(Json(json!({ "flags": flags })))
}

/// PUT /admin/flags/{name} - create or update a flag
async fn put_flag_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(def): Json<FlagDefinition>,
) -> Result<impl IntoResponse> {
    let existing = state.flags.get_flag(&name).await?;
    let (status, flag) = if existing.is_some() {
        (StatusCode::OK, state.flags.update_flag(&name, def).await?)
    } else {
        (
            StatusCode::CREATED,
            state.flags.create_flag(&name, def).await?,
        )
    };
    Ok((status, Json(flag)))
}

/// DELETE /admin/flags/{name}
async fn delete_flag_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    if state.flags.get_flag(&name).await?.is_none() {
        return Err(Error::FeatureUnavailable(name));
    }
    state.flags.delete_flag(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
