//! Metrics collection module
//!
//! Passive counters and a bounded latency window, exposed through
//! [`Metrics::snapshot`] for health checks and external monitoring.

use crate::pool::PoolState;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Latency samples kept for percentile estimates
pub const LATENCY_WINDOW: usize = 1024;

/// Request counters and latency tracker
pub struct Metrics {
    requests: AtomicU64,
    errors: AtomicU64,
    fallbacks: AtomicU64,
    retries: AtomicU64,
    /// Most recent request latencies in ms, oldest first
    latencies: RwLock<VecDeque<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn inc_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end-to-end latency of one request
    pub fn record_latency(&self, elapsed: Duration) {
        let mut window = self
            .latencies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Nearest-rank percentile (`p` in `[0, 100]`) of the latency window
    pub fn latency_percentile(&self, p: f64) -> Option<f64> {
        let window = self
            .latencies
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if window.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }

    /// Point-in-time view combining counters with pool occupancy
    pub fn snapshot(&self, pool: PoolState, degraded: bool) -> HealthSnapshot {
        let request_count = self.request_count();
        let error_count = self.error_count();
        let error_rate = if request_count == 0 {
            0.0
        } else {
            error_count as f64 / request_count as f64
        };

        let status = if pool.in_use == 0 && pool.available == 0 {
            HealthStatus::Unavailable
        } else if degraded || pool.is_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            request_count,
            error_count,
            error_rate,
            fallback_count: self.fallbacks.load(Ordering::Relaxed),
            retry_count: self.retries.load(Ordering::Relaxed),
            latency_p50_ms: self.latency_percentile(50.0),
            latency_p95_ms: self.latency_percentile(95.0),
            pool,
            degraded,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but only through the fallback path
    Degraded,
    /// No worker can serve
    Unavailable,
}

/// Health and metrics as seen by monitoring
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub fallback_count: u64,
    pub retry_count: u64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub pool: PoolState,
    pub degraded: bool,
}
