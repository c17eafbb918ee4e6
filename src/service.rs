//! Service composition
//!
//! [`ForecastService`] is built once at process start and passed down to
//! whatever serves requests. [`ServiceCell`] is for callers that need lazy
//! construction: concurrent first calls still build exactly one service.

use crate::config::Settings;
use crate::corpus::{CorpusLoader, CorpusStore};
use crate::engine::{Embedder, EngineFactory};
use crate::error::ForecastResult;
use crate::forecast::{ForecastResponse, Horizon, Orchestrator, QueryRequest};
use crate::metrics::HealthSnapshot;
use crate::pool::{PoolState, WorkerPool};
use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// The forecasting engine: corpus, worker pool and orchestrator
pub struct ForecastService {
    settings: Arc<Settings>,
    orchestrator: Orchestrator,
    horizons: Vec<Horizon>,
}

impl ForecastService {
    /// Load the corpus, calibrate, and bring up the worker pool.
    ///
    /// The service starts degraded when the pool comes up below capacity.
    pub async fn build(
        settings: Settings,
        loader: &dyn CorpusLoader,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let dimension = settings.search.dimension;

        if embedder.dimension() != dimension {
            bail!(
                "embedder produces {}-dimensional vectors but search.dimension is {}",
                embedder.dimension(),
                dimension
            );
        }

        let requested = settings
            .corpus
            .horizons
            .iter()
            .map(|&hours| Horizon::try_from(hours as i64))
            .collect::<Result<Vec<_>, _>>()?;

        let store = Arc::new(CorpusStore::load(loader, &requested, dimension)?);
        let factory = EngineFactory::new(store.clone(), &settings.search);
        let horizons = factory.horizons().to_vec();

        let pool = WorkerPool::new(settings.pool.capacity);
        let state = pool
            .initialize(&factory)
            .await
            .context("failed to initialize the worker pool")?;

        info!(
            "Forecast service ready: {}/{} workers, horizons {:?}",
            state.built,
            state.capacity,
            horizons.iter().map(|h| h.hours()).collect::<Vec<_>>()
        );

        let orchestrator =
            Orchestrator::new(settings.clone(), pool, store, embedder, factory.transform());

        Ok(Self {
            settings,
            orchestrator,
            horizons,
        })
    }

    pub async fn forecast(&self, request: QueryRequest) -> ForecastResult<ForecastResponse> {
        self.orchestrator.forecast(request).await
    }

    /// Metrics and pool occupancy for monitoring
    pub fn health(&self) -> HealthSnapshot {
        self.orchestrator
            .metrics()
            .snapshot(self.orchestrator.pool().state(), self.is_degraded())
    }

    pub fn is_degraded(&self) -> bool {
        self.orchestrator.is_degraded()
    }

    /// Clear degraded mode; requests use the real path again
    pub fn reset_degraded(&self) {
        self.orchestrator.set_degraded(false);
    }

    /// Horizons with a calibrated index
    pub fn horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool_state(&self) -> PoolState {
        self.orchestrator.pool().state()
    }

    /// Cancel waiters, drain outstanding handles and dispose all workers
    pub async fn shutdown(&self) -> PoolState {
        info!("Shutting down forecast service");
        self.orchestrator
            .pool()
            .shutdown(self.settings.pool.drain_timeout())
            .await
    }
}

/// Owned lazy holder for a single [`ForecastService`]
#[derive(Default)]
pub struct ServiceCell {
    cell: OnceCell<Arc<ForecastService>>,
}

impl ServiceCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The service, building it with `init` on first use.
    ///
    /// Concurrent callers wait on the one in-flight construction. A failed
    /// construction leaves the cell empty so a later call can try again.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<ForecastService>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ForecastService>>,
    {
        self.cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    pub fn get(&self) -> Option<Arc<ForecastService>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{HashEmbedder, SyntheticCorpusLoader};
    use crate::metrics::HealthStatus;
    use crate::pool::PoolLifecycle;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_settings() -> Settings {
        let mut settings = Settings::default();
        settings.search.dimension = 8;
        settings.pool.capacity = 2;
        settings.corpus.synthetic_size = 300;
        settings.corpus.horizons = vec![24];
        settings
    }

    fn loader(settings: &Settings) -> SyntheticCorpusLoader {
        SyntheticCorpusLoader::new(
            settings.corpus.synthetic_size,
            settings.corpus.seed,
            settings.synthesis.variables.clone(),
        )
    }

    async fn build(settings: Settings) -> Result<ForecastService> {
        let loader = loader(&settings);
        let embedder = Arc::new(HashEmbedder::new(settings.search.dimension));
        ForecastService::build(settings, &loader, embedder).await
    }

    #[tokio::test]
    async fn test_build_and_health() {
        let service = build(small_settings()).await.unwrap();
        assert_eq!(service.horizons(), &[Horizon::H24]);
        assert!(!service.is_degraded());

        let health = service.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.pool.capacity, 2);
        assert_eq!(health.pool.available, 2);
        assert_eq!(health.request_count, 0);
    }

    #[tokio::test]
    async fn test_embedder_dimension_mismatch_fails_build() {
        let settings = small_settings();
        let loader = loader(&settings);
        let result =
            ForecastService::build(settings, &loader, Arc::new(HashEmbedder::new(16))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_build() {
        let mut settings = small_settings();
        settings.synthesis.temperature = 0.0;
        assert!(build(settings).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_pool() {
        let service = build(small_settings()).await.unwrap();
        let response = service
            .forecast(QueryRequest::new(24, 5, Utc::now()))
            .await
            .unwrap();
        assert!(!response.is_fallback());

        let state = service.shutdown().await;
        assert_eq!(state.lifecycle, PoolLifecycle::Closed);
        assert_eq!(service.health().status, HealthStatus::Unavailable);

        let err = service
            .forecast(QueryRequest::new(24, 5, Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "service_unavailable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_service_cell_builds_once() {
        let cell = Arc::new(ServiceCell::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                let builds = builds.clone();
                tokio::spawn(async move {
                    cell.get_or_init(|| async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        build(small_settings()).await
                    })
                    .await
                    .map(|s| Arc::as_ptr(&s) as usize)
                })
            })
            .collect();

        let ptrs: Vec<usize> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
        assert!(cell.get().is_some());
    }

    #[tokio::test]
    async fn test_service_cell_retries_after_failure() {
        let cell = ServiceCell::new();
        let first = cell
            .get_or_init(|| async { Err(anyhow::anyhow!("corpus missing")) })
            .await;
        assert!(first.is_err());
        assert!(cell.get().is_none());

        let second = cell.get_or_init(|| build(small_settings())).await;
        assert!(second.is_ok());
    }
}
