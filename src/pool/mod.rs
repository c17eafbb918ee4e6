//! Worker pool module
//!
//! Owns a fixed set of independent search engine instances and hands out
//! exclusive, bounded-wait access to them.

mod handle;
mod manager;

pub use handle::EngineHandle;
pub use manager::{PoolLifecycle, PoolState, WorkerFactory, WorkerPool};

use std::time::Duration;
use thiserror::Error;

/// Pool failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// No worker became free in time
    #[error("no worker available within {0:?}")]
    Timeout(Duration),

    /// Initialization built no worker at all
    #[error("worker pool unavailable: no worker could be built")]
    Unavailable,

    /// Operation not valid in the current lifecycle state
    #[error("worker pool not ready ({0})")]
    NotReady(PoolLifecycle),

    /// Pool is draining or closed; pending waiters are cancelled
    #[error("worker pool closed")]
    Closed,
}
