//! Pool lifecycle, acquisition and draining

use super::handle::EngineHandle;
use super::PoolError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

/// Builds one worker per pool slot
#[async_trait]
pub trait WorkerFactory<W>: Send + Sync {
    async fn build(&self, slot: usize) -> anyhow::Result<W>;
}

/// Pool lifecycle: `Uninitialized → Initializing → Ready → Draining → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PoolLifecycle {
    Uninitialized,
    Initializing,
    /// Serving; `degraded` when fewer than `capacity` workers were built
    Ready { degraded: bool },
    Draining,
    Closed,
}

impl fmt::Display for PoolLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready { degraded: false } => write!(f, "ready"),
            Self::Ready { degraded: true } => write!(f, "ready (degraded)"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Serialize)]
pub struct PoolState {
    /// Configured number of workers
    pub capacity: usize,
    /// Workers actually built
    pub built: usize,
    pub available: usize,
    pub in_use: usize,
    /// Calls to `acquire` since start-up
    pub acquisitions: u64,
    pub lifecycle: PoolLifecycle,
}

impl PoolState {
    pub fn is_degraded(&self) -> bool {
        matches!(self.lifecycle, PoolLifecycle::Ready { degraded: true })
    }
}

struct SlotTable<W> {
    workers: Vec<Option<Arc<W>>>,
    in_use: Vec<bool>,
    idle: VecDeque<usize>,
}

impl<W> SlotTable<W> {
    fn empty() -> Self {
        Self {
            workers: Vec::new(),
            in_use: Vec::new(),
            idle: VecDeque::new(),
        }
    }

    fn in_use_count(&self) -> usize {
        self.in_use.iter().filter(|&&busy| busy).count()
    }

    fn built(&self) -> usize {
        self.workers.iter().filter(|w| w.is_some()).count()
    }
}

pub(crate) struct PoolInner<W> {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    slots: Mutex<SlotTable<W>>,
    lifecycle: RwLock<PoolLifecycle>,
    released: Notify,
    acquisitions: AtomicU64,
}

impl<W> PoolInner<W> {
    fn slots(&self) -> MutexGuard<'_, SlotTable<W>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> PoolLifecycle {
        *self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, next: PoolLifecycle) {
        let mut current = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        debug!("Pool lifecycle {} -> {}", *current, next);
        *current = next;
    }

    /// Mark a slot idle again. Returns `false` (and changes nothing) if the
    /// slot was not checked out.
    pub(crate) fn checkin(&self, slot: usize) -> bool {
        let mut table = self.slots();
        match table.in_use.get(slot).copied() {
            Some(true) => {}
            _ => {
                warn!("Release of pool slot {} that is not checked out; ignoring", slot);
                return false;
            }
        }
        table.in_use[slot] = false;
        if table.workers[slot].is_some() {
            table.idle.push_back(slot);
        }
        drop(table);
        self.released.notify_waiters();
        true
    }

    fn checkout(&self) -> Option<(usize, Arc<W>)> {
        let mut table = self.slots();
        while let Some(slot) = table.idle.pop_front() {
            if let Some(worker) = table.workers[slot].clone() {
                table.in_use[slot] = true;
                return Some((slot, worker));
            }
        }
        None
    }
}

/// Fixed-size pool of exclusively owned workers
pub struct WorkerPool<W> {
    inner: Arc<PoolInner<W>>,
}

impl<W> Clone for WorkerPool<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Send + Sync + 'static> WorkerPool<W> {
    /// Create an empty pool; nothing can be acquired until [`initialize`](Self::initialize)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                semaphore: Arc::new(Semaphore::new(0)),
                slots: Mutex::new(SlotTable::empty()),
                lifecycle: RwLock::new(PoolLifecycle::Uninitialized),
                released: Notify::new(),
                acquisitions: AtomicU64::new(0),
            }),
        }
    }

    /// Build `capacity` workers through `factory`.
    ///
    /// Succeeds in a degraded state if at least one worker was built.
    pub async fn initialize(&self, factory: &dyn WorkerFactory<W>) -> Result<PoolState, PoolError> {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *lifecycle != PoolLifecycle::Uninitialized {
                return Err(PoolError::NotReady(*lifecycle));
            }
            *lifecycle = PoolLifecycle::Initializing;
        }

        let capacity = self.inner.capacity;
        let mut workers = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            match factory.build(slot).await {
                Ok(worker) => {
                    debug!("Built worker for slot {}", slot);
                    workers.push(Some(Arc::new(worker)));
                }
                Err(e) => {
                    warn!("Failed to build worker for slot {}: {:#}", slot, e);
                    workers.push(None);
                }
            }
        }

        let built = workers.iter().filter(|w| w.is_some()).count();
        if built == 0 {
            error!("No worker could be built (capacity {})", capacity);
            self.inner.set_lifecycle(PoolLifecycle::Closed);
            return Err(PoolError::Unavailable);
        }

        {
            let mut table = self.inner.slots();
            table.idle = (0..capacity).filter(|&i| workers[i].is_some()).collect();
            table.in_use = vec![false; capacity];
            table.workers = workers;
        }

        let degraded = built < capacity;
        self.inner.semaphore.add_permits(built);
        self.inner.set_lifecycle(PoolLifecycle::Ready { degraded });

        if degraded {
            warn!("Worker pool ready in degraded mode: {}/{} workers", built, capacity);
        } else {
            info!("Worker pool ready: {} workers", built);
        }

        Ok(self.state())
    }

    /// Wait up to `timeout` for exclusive access to a worker
    pub async fn acquire(&self, timeout: Duration) -> Result<EngineHandle<W>, PoolError> {
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        match self.inner.lifecycle() {
            PoolLifecycle::Ready { .. } => {}
            PoolLifecycle::Draining | PoolLifecycle::Closed => return Err(PoolError::Closed),
            other => return Err(PoolError::NotReady(other)),
        }

        let start = Instant::now();
        let permit = match tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                debug!("Acquire timed out after {:?}", start.elapsed());
                return Err(PoolError::Timeout(timeout));
            }
        };

        match self.inner.checkout() {
            Some((slot, worker)) => {
                debug!("Acquired slot {} in {:?}", slot, start.elapsed());
                Ok(EngineHandle::new(self.inner.clone(), slot, worker, permit))
            }
            // Workers were disposed while we waited
            None => Err(PoolError::Closed),
        }
    }

    /// Return a handle to the pool
    pub fn release(&self, handle: EngineHandle<W>) {
        handle.release();
    }

    /// Cancel pending waiters, wait for outstanding handles, dispose all workers
    pub async fn shutdown(&self, drain_timeout: Duration) -> PoolState {
        match self.inner.lifecycle() {
            PoolLifecycle::Closed | PoolLifecycle::Draining => return self.state(),
            _ => {}
        }

        self.inner.set_lifecycle(PoolLifecycle::Draining);
        self.inner.semaphore.close();

        let deadline = Instant::now() + drain_timeout;
        loop {
            let notified = self.inner.released.notified();
            let outstanding = self.inner.slots().in_use_count();
            if outstanding == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, notified).await.is_err() {
                warn!(
                    "Drain timeout elapsed with {} handles outstanding; disposing anyway",
                    outstanding
                );
                break;
            }
        }

        {
            let mut table = self.inner.slots();
            table.idle.clear();
            for worker in table.workers.iter_mut() {
                worker.take();
            }
        }
        self.inner.set_lifecycle(PoolLifecycle::Closed);
        info!("Worker pool closed");

        self.state()
    }

    /// Occupancy snapshot
    pub fn state(&self) -> PoolState {
        let table = self.inner.slots();
        PoolState {
            capacity: self.inner.capacity,
            built: table.built(),
            available: table.idle.len(),
            in_use: table.in_use_count(),
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            lifecycle: self.inner.lifecycle(),
        }
    }

    pub fn lifecycle(&self) -> PoolLifecycle {
        self.inner.lifecycle()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<PoolInner<W>> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlotFactory {
        failing: Vec<usize>,
    }

    #[async_trait]
    impl WorkerFactory<usize> for SlotFactory {
        async fn build(&self, slot: usize) -> anyhow::Result<usize> {
            if self.failing.contains(&slot) {
                anyhow::bail!("slot {} refused to build", slot);
            }
            Ok(slot)
        }
    }

    async fn ready_pool(capacity: usize) -> WorkerPool<usize> {
        let pool = WorkerPool::new(capacity);
        pool.initialize(&SlotFactory { failing: vec![] })
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_initialize_full_capacity() {
        let pool = WorkerPool::new(3);
        let state = pool
            .initialize(&SlotFactory { failing: vec![] })
            .await
            .unwrap();
        assert_eq!(state.built, 3);
        assert_eq!(state.available, 3);
        assert_eq!(state.lifecycle, PoolLifecycle::Ready { degraded: false });
    }

    #[tokio::test]
    async fn test_initialize_degraded() {
        let pool = WorkerPool::new(3);
        let state = pool
            .initialize(&SlotFactory { failing: vec![1] })
            .await
            .unwrap();
        assert_eq!(state.built, 2);
        assert!(state.is_degraded());

        // the missing slot is never handed out
        let a = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(a.slot(), 1);
        assert_ne!(b.slot(), 1);
        assert!(pool.acquire(Duration::from_millis(20)).await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_nothing_built() {
        let pool = WorkerPool::new(2);
        let err = pool
            .initialize(&SlotFactory { failing: vec![0, 1] })
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::Unavailable);
        assert_eq!(pool.lifecycle(), PoolLifecycle::Closed);
    }

    #[tokio::test]
    async fn test_initialize_twice_rejected() {
        let pool = ready_pool(1).await;
        let err = pool
            .initialize(&SlotFactory { failing: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NotReady(PoolLifecycle::Ready { .. })));
    }

    #[tokio::test]
    async fn test_acquire_before_initialize() {
        let pool: WorkerPool<usize> = WorkerPool::new(1);
        let err = pool.acquire(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, PoolError::NotReady(PoolLifecycle::Uninitialized));
    }

    #[tokio::test]
    async fn test_acquire_times_out_within_bound() {
        let pool = ready_pool(1).await;
        let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();

        let timeout = Duration::from_millis(60);
        let start = Instant::now();
        let err = pool.acquire(timeout).await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err, PoolError::Timeout(timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_release_then_acquire() {
        let pool = ready_pool(1).await;
        let handle = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(pool.state().in_use, 1);
        pool.release(handle);
        assert_eq!(pool.state().in_use, 0);

        let again = pool.acquire(Duration::from_millis(50)).await;
        assert!(again.is_ok());
        assert_eq!(pool.state().acquisitions, 2);
    }

    #[tokio::test]
    async fn test_drop_returns_handle() {
        let pool = ready_pool(1).await;
        {
            let _handle = pool.acquire(Duration::from_millis(50)).await.unwrap();
            assert_eq!(pool.state().available, 0);
        }
        assert_eq!(pool.state().available, 1);
    }

    #[tokio::test]
    async fn test_double_checkin_is_noop() {
        let pool = ready_pool(2).await;
        let handle = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let slot = handle.slot();
        pool.release(handle);

        assert!(!pool.inner().checkin(slot));
        let state = pool.state();
        assert_eq!(state.available, 2);
        assert_eq!(state.in_use, 0);
    }

    #[tokio::test]
    async fn test_cancelled_task_returns_handle() {
        let pool = ready_pool(1).await;
        let task_pool = pool.clone();
        let task = tokio::spawn(async move {
            let _handle = task_pool.acquire(Duration::from_millis(50)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.state().in_use, 1);
        task.abort();
        let _ = task.await;

        assert_eq!(pool.state().in_use, 0);
        assert!(pool.acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_occupancy_never_exceeds_capacity() {
        let capacity = 3;
        let pool = ready_pool(capacity).await;
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let pool = pool.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let handle = pool.acquire(Duration::from_secs(5)).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.state().in_use <= capacity);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    pool.release(handle);
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= capacity);
        let state = pool.state();
        assert_eq!(state.in_use, 0);
        assert_eq!(state.available, capacity);
        assert!(pool.acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiters_and_drains() {
        let pool = ready_pool(1).await;
        let held = pool.acquire(Duration::from_millis(50)).await.unwrap();

        let waiter_pool = pool.clone();
        let waiter =
            tokio::spawn(async move { waiter_pool.acquire(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let shutdown_pool = pool.clone();
        let shutdown =
            tokio::spawn(async move { shutdown_pool.shutdown(Duration::from_secs(5)).await });

        let waited = waiter.await.unwrap();
        assert_eq!(waited.unwrap_err(), PoolError::Closed);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.lifecycle(), PoolLifecycle::Draining);
        drop(held);

        let state = shutdown.await.unwrap();
        assert_eq!(state.lifecycle, PoolLifecycle::Closed);
        assert_eq!(state.in_use, 0);
        assert_eq!(state.built, 0);
        assert_eq!(
            pool.acquire(Duration::from_millis(10)).await.unwrap_err(),
            PoolError::Closed
        );
    }
}
