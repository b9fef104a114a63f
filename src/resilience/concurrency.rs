//! Bounded-parallelism gate per dependency

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::GateMode;
use crate::{Error, Result};

/// Counting semaphore bounding simultaneous in-flight calls to one
/// dependency, independent of how many caller requests are being served.
pub struct ConcurrencyGate {
    name: String,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    mode: GateMode,
}

impl ConcurrencyGate {
    /// Create a gate with `max_concurrent` permits.
    #[must_use]
    pub fn new(name: &str, max_concurrent: usize, mode: GateMode) -> Self {
        Self {
            name: name.to_string(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            mode,
        }
    }

    /// Acquire a permit for one logical call.
    ///
    /// In `Wait` mode the caller suspends until a permit frees up; in
    /// `Reject` mode a saturated gate fails fast with
    /// [`Error::ConcurrencyLimit`]. The returned permit releases on drop,
    /// which covers every exit path including timeout and cancellation.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        match self.mode {
            GateMode::Wait => {
                if self.semaphore.available_permits() == 0 {
                    debug!(dependency = %self.name, "Gate at capacity, waiting");
                }
                Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal(format!("gate closed for {}", self.name)))
            }
            GateMode::Reject => Arc::clone(&self.semaphore)
                .try_acquire_owned()
                .map_err(|_| Error::ConcurrencyLimit {
                    dependency: self.name.clone(),
                }),
        }
    }

    /// Calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
