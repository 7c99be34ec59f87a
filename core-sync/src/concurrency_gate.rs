//! Global bound on simultaneously running sync jobs, shared by all sources.

use crate::error::{Result, SyncError};
use core_async::sync::{OwnedSemaphorePermit, Semaphore};
use core_runtime::config::DEFAULT_GATE_CAPACITY;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. The permit is released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Cancelled)
    }

    /// Run `body` while holding a permit.
    pub async fn with_permit<T, Fut>(&self, body: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        trace!(available = self.available(), "Gate permit acquired");
        body.await
    }

    /// Reject further acquisitions; waiters receive `SyncError::Cancelled`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_CAPACITY)
    }
}
