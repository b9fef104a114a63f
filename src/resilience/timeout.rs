//! Per-attempt deadline enforcement

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// Race a call against a deadline.
///
/// On expiry the in-flight future is dropped (best-effort cancellation; if
/// the underlying transport cannot cancel, the downstream work is abandoned)
/// and the attempt fails with [`Error::DependencyTimeout`], which the
/// circuit breaker counts as a failure. The deadline applies per attempt,
/// not per retry sequence.
pub async fn with_timeout<T, Fut>(dependency: String, timeout: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                dependency = %dependency,
                timeout_secs = timeout.as_secs_f64(),
                "Dependency call timed out"
            );
            Err(Error::DependencyTimeout {
                dependency,
                timeout,
            })
        }
    }
}
