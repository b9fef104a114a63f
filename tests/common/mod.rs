//! Shared helpers for integration tests: an in-memory control plane behind
//! the full middleware chain.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use fleetguard::config::{Config, StoreBackend};
use fleetguard::http::{AppState, control_router};

/// Default config pointed at the in-memory counter store.
pub fn memory_config() -> Config {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Memory;
    config
}

/// Build the full application state.
pub async fn build_state(config: Config) -> Arc<AppState> {
    AppState::build(config).await.expect("state build")
}

/// Control router plus optional service routes, behind the ordered
/// middleware chain.
pub fn app(state: &Arc<AppState>, service_routes: Option<Router>) -> Router {
    let mut router = control_router(Arc::clone(state));
    if let Some(routes) = service_routes {
        router = router.merge(routes);
    }
    state.apply_control_layers(router)
}
