use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::ConfigError;

/// Default cap on simultaneously running users. Keeps the number of open sockets
/// well below common file-descriptor limits.
pub const DEFAULT_CONCURRENCY: usize = 200;

/// Largest limit [`ConcurrencyLimiter::drain`] can take back in one go.
const MAX_LIMIT: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Caps how many simulated users run at the same time.
///
/// Each running user holds one permit. The permit is an RAII guard: dropping it,
/// on any path, gives the slot back.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    limit: u32,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(ConfigError::Concurrency {
                value: limit,
                max: MAX_LIMIT,
            });
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit: limit as u32,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit as usize
    }

    /// Permits not currently held by a user.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot.
    ///
    /// Returns `None` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        }
    }

    /// Wait until every permit is back, then shut the limiter.
    ///
    /// Once this returns no user holds a permit, so none is still running.
    pub async fn drain(self) {
        match self.permits.acquire_many(self.limit).await {
            Ok(all) => all.forget(),
            Err(_) => tracing::warn!("Limiter was closed before it could be drained."),
        }
        self.permits.close();
    }
}
