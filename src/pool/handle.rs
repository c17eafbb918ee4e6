//! Exclusive ownership token for one pooled worker

use super::manager::PoolInner;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// Exclusive access to one worker.
///
/// The worker goes back to the pool exactly once: on [`EngineHandle::release`]
/// or, failing that, when the handle is dropped. Dropping covers early
/// returns, panics and cancelled or timed-out tasks.
pub struct EngineHandle<W> {
    pool: Arc<PoolInner<W>>,
    slot: usize,
    worker: Arc<W>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<W> EngineHandle<W> {
    pub(crate) fn new(
        pool: Arc<PoolInner<W>>,
        slot: usize,
        worker: Arc<W>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            slot,
            worker,
            permit: Some(permit),
        }
    }

    /// Pool slot this handle occupies
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Return the worker to the pool now
    pub fn release(mut self) {
        self.return_to_pool();
    }

    fn return_to_pool(&mut self) {
        // The slot must be idle again before the permit frees a waiter.
        if let Some(permit) = self.permit.take() {
            self.pool.checkin(self.slot);
            drop(permit);
        }
    }
}

impl<W> Deref for EngineHandle<W> {
    type Target = W;

    fn deref(&self) -> &W {
        &self.worker
    }
}

impl<W> Drop for EngineHandle<W> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl<W> fmt::Debug for EngineHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("slot", &self.slot)
            .field("held", &self.permit.is_some())
            .finish()
    }
}
