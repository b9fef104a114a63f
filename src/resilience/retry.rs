//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::time::sleep;
use tracing::debug;

use crate::config::DependencySettings;
use crate::{Error, Result};

/// Retry policy for one dependency
#[derive(Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Build the policy for a dependency from its resolved settings.
    #[must_use]
    pub fn new(settings: &DependencySettings, config: &crate::config::RetryConfig) -> Self {
        Self {
            enabled: settings.retry_enabled,
            max_retries: settings.max_retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    /// Create an exponential backoff instance (jitter is built in via the
    /// randomization factor).
    #[must_use]
    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Execute a future with retry logic.
///
/// `precheck` runs before every attempt, including the first; the facade
/// uses it to stop retrying the moment the circuit breaker opens. At most
/// `max_retries + 1` attempts are made.
///
/// # Errors
///
/// Returns the last error from `f` if all attempts are exhausted, the error
/// is not retryable, or `precheck` rejects.
pub async fn with_retry<C, F, Fut, T>(
    policy: &RetryPolicy,
    name: &str,
    mut precheck: C,
    mut f: F,
) -> Result<T>
where
    C: FnMut() -> Result<()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !policy.enabled {
        precheck()?;
        return f().await;
    }

    let mut backoff = policy.create_backoff();
    let mut attempts = 0u32;
    let max_attempts = policy.max_retries + 1;

    loop {
        precheck()?;
        attempts += 1;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempts >= max_attempts {
                    debug!(
                        dependency = name,
                        attempts = attempts,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    debug!(
                        dependency = name,
                        attempt = attempts,
                        delay_ms = duration.as_millis(),
                        error = %e,
                        "Retrying after backoff"
                    );
                    sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}
