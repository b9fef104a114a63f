//! Control-plane server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, control_router};
use crate::config::Config;
use crate::{Error, Result};

/// Control-plane HTTP server.
///
/// Serves the control endpoints (`/health`, `/ready`, `/metrics`, flags
/// admin) plus any service routes mounted by the host, all behind the
/// ordered middleware chain.
pub struct Server {
    state: Arc<AppState>,
    service_routes: Option<Router>,
}

impl Server {
    /// Build the server state from configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let state = AppState::build(config).await?;
        Ok(Self {
            state,
            service_routes: None,
        })
    }

    /// Set the Prometheus render handle for `GET /metrics`.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_prometheus(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        // The state is not shared until `state()` or `run()` is called.
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.prometheus = Some(handle);
        } else {
            warn!("State already shared, metrics handle not installed");
        }
        self
    }

    /// Mount the host service's own routes alongside the control endpoints.
    #[must_use]
    pub fn with_service_routes(mut self, routes: Router) -> Self {
        self.service_routes = Some(routes);
        self
    }

    /// Shared state, for wiring host handlers.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let config = &self.state.config;
        let addr = SocketAddr::new(
            config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            config.server.port,
        );

        let mut app = control_router(Arc::clone(&self.state));
        if let Some(routes) = self.service_routes {
            app = app.merge(routes);
        }
        let app = self.state.apply_control_layers(app);

        let listener = TcpListener::bind(addr).await?;

        info!(
            service = %config.service.name,
            environment = %config.service.environment,
            host = %config.server.host,
            port = config.server.port,
            "Control plane listening"
        );
        info!(
            rate_limit_rules = config.rate_limit.rules.len(),
            security_filter = config.security.enabled,
            "Control plane configured"
        );
        if !config.security.enabled {
            warn!("SECURITY FILTER disabled - perimeter checks are off");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Control plane shut down");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
