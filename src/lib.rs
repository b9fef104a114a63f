//! Fleetguard - operational control plane for HTTP microservices
//!
//! The shared layer every service in the fleet mounts in front of its
//! handlers:
//!
//! - **Resilience**: per-dependency circuit breaking, retry with backoff,
//!   per-attempt timeouts, and concurrency limiting behind one facade
//! - **Rate limiting**: per-client, per-route admission control with
//!   minute/hour/day windows in a shared counter store
//! - **Feature flags**: ordered rule evaluation (boolean, percentage,
//!   user list, environment, time window) with TTL-bound cross-instance
//!   propagation
//! - **Security filter**: origin/method/header validation, injection-pattern
//!   detection, and violation-rate throttling
//! - **Health**: `/health` and `/ready` aggregated from live breaker state
//!
//! Breaker and gate state are process-local; rate limits and flags go
//! through the counter store so those decisions hold across instances.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod flags;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod resilience;
pub mod security;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
