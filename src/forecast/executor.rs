//! Request orchestration
//!
//! Each forecast moves through
//! `Validating → Acquiring → Searching → ValidatingResult → Synthesizing → Done`.
//! Acquire timeouts, unavailable indices and rejected retrievals re-enter
//! `Acquiring` after a short backoff; once retries run out the request ends
//! in `Fallback` (when enabled) or fails as service unavailable.

use super::fallback::FallbackPlanner;
use super::models::{
    ForecastResponse, QueryRequest, SearchMetadata, SearchMethod, Timings, ValidatedQuery,
};
use crate::cache::EmbeddingCache;
use crate::config::Settings;
use crate::corpus::{CorpusStore, HorizonCorpus};
use crate::engine::{AnalogEngine, Embedder, SimilarityTransform};
use crate::ensemble::{EnsembleResult, EnsembleSynthesizer};
use crate::error::{ErrorKind, ForecastResult};
use crate::metrics::Metrics;
use crate::pool::WorkerPool;
use crate::validation::ResultValidator;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Distance reported in response metadata: Euclidean distance between unit vectors
pub const DISTANCE_METRIC: &str = "l2_unit";

/// Per-request state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Acquiring,
    Searching,
    ValidatingResult,
    Synthesizing,
    Retrying,
    Fallback,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Acquiring => "acquiring",
            Self::Searching => "searching",
            Self::ValidatingResult => "validating_result",
            Self::Synthesizing => "synthesizing",
            Self::Retrying => "retrying",
            Self::Fallback => "fallback",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Stage timings measured inside the blocking section
struct AttemptOutcome {
    ensemble: EnsembleResult,
    search_ms: f64,
    validate_ms: f64,
    synthesize_ms: f64,
}

fn millis(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Composes pool, search, validation and synthesis under the retry and
/// fallback policy
pub struct Orchestrator {
    settings: Arc<Settings>,
    pool: WorkerPool<AnalogEngine>,
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    validator: Arc<ResultValidator>,
    synthesizer: Arc<EnsembleSynthesizer>,
    fallback: FallbackPlanner,
    metrics: Arc<Metrics>,
    degraded: AtomicBool,
}

impl Orchestrator {
    /// Degraded mode starts on if the pool came up below capacity
    pub fn new(
        settings: Arc<Settings>,
        pool: WorkerPool<AnalogEngine>,
        store: Arc<CorpusStore>,
        embedder: Arc<dyn Embedder>,
        transform: SimilarityTransform,
    ) -> Self {
        let degraded = pool.state().is_degraded();
        if degraded {
            warn!("Starting in degraded mode; requests will be served by the fallback path");
        }
        Self {
            cache: EmbeddingCache::from_settings(&settings.cache),
            validator: Arc::new(ResultValidator::new(&settings.validation)),
            synthesizer: Arc::new(EnsembleSynthesizer::new(&settings.synthesis)),
            fallback: FallbackPlanner::new(transform),
            metrics: Arc::new(Metrics::new()),
            degraded: AtomicBool::new(degraded),
            settings,
            pool,
            store,
            embedder,
        }
    }

    pub fn pool(&self) -> &WorkerPool<AnalogEngine> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Leave or enter degraded mode
    pub fn set_degraded(&self, degraded: bool) {
        let previous = self.degraded.swap(degraded, Ordering::SeqCst);
        if previous != degraded {
            info!("Degraded mode {}", if degraded { "entered" } else { "cleared" });
        }
    }

    /// Serve one forecast request
    pub async fn forecast(&self, request: QueryRequest) -> ForecastResult<ForecastResponse> {
        let start = Instant::now();
        self.metrics.inc_request();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = self.run(&correlation_id, &request, start).await;
        self.metrics.record_latency(start.elapsed());

        match &result {
            Ok(response) => {
                if response.is_fallback() {
                    self.metrics.inc_fallback();
                }
                debug!(
                    correlation_id = %correlation_id,
                    stage = %Stage::Done,
                    method = %response.search_metadata.method,
                    "Forecast served in {:.1}ms",
                    response.search_metadata.timings_ms.total
                );
            }
            Err(kind) => {
                self.metrics.inc_error();
                warn!(correlation_id = %correlation_id, code = kind.code(), "Forecast failed: {}", kind);
            }
        }

        result.map_err(|kind| kind.with_correlation(correlation_id))
    }

    async fn run(
        &self,
        correlation_id: &str,
        request: &QueryRequest,
        start: Instant,
    ) -> Result<ForecastResponse, ErrorKind> {
        debug!(correlation_id, stage = %Stage::Validating, "horizon={} k={}", request.horizon, request.k);
        let query = request.validate()?;

        let corpus = self.store.get(query.horizon).ok_or_else(|| {
            warn!(correlation_id, "No corpus loaded for horizon {}", query.horizon);
            ErrorKind::ServiceUnavailable
        })?;

        let mut timings = Timings::default();

        if self.is_degraded() {
            return self.fallback_or_unavailable(
                correlation_id,
                &query,
                &corpus,
                ErrorKind::ServiceUnavailable,
                timings,
                0,
                start,
            );
        }

        let embed_start = Instant::now();
        let vector = match self
            .cache
            .get_or_embed(self.embedder.as_ref(), query.query_time)
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                warn!(correlation_id, "Embedding failed: {:#}", e);
                return self.fallback_or_unavailable(
                    correlation_id,
                    &query,
                    &corpus,
                    ErrorKind::SearchUnavailable("embedding failed".to_string()),
                    timings,
                    0,
                    start,
                );
            }
        };
        timings.embed = millis(embed_start);

        // one deadline for the searching span of every attempt
        let deadline = tokio::time::Instant::now() + self.settings.resilience.request_timeout();
        let max_attempts = self.settings.resilience.max_retries + 1;
        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            match self
                .attempt(correlation_id, &query, &corpus, &vector, deadline, &mut timings)
                .await
            {
                Ok(ensemble) => {
                    for (name, var) in ensemble.unavailable_variables() {
                        warn!(
                            correlation_id,
                            code = "synthesis_failed",
                            "Variable {} unavailable: {}",
                            name,
                            var.reason.as_deref().unwrap_or("unknown")
                        );
                    }
                    timings.total = millis(start);
                    let metadata = self.metadata(SearchMethod::Real, &query, &corpus, &ensemble, timings, attempts);
                    return Ok(ForecastResponse::from_ensemble(
                        correlation_id.to_string(),
                        &query,
                        ensemble,
                        metadata,
                    ));
                }
                Err(kind) if !kind.is_retryable() => return Err(kind),
                Err(kind) if attempts >= max_attempts => break kind,
                Err(kind) => {
                    let delay = self.backoff(attempts);
                    if tokio::time::Instant::now() + delay >= deadline {
                        debug!(
                            correlation_id,
                            "Request deadline leaves no room for attempt {}",
                            attempts + 1
                        );
                        break kind;
                    }
                    self.metrics.inc_retry();
                    debug!(
                        correlation_id,
                        stage = %Stage::Retrying,
                        "Attempt {} failed ({}); retrying in {:?}",
                        attempts,
                        kind.code(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        warn!(
            correlation_id,
            "Giving up on the real path after {} attempts: {}", attempts, last_error
        );
        self.fallback_or_unavailable(
            correlation_id,
            &query,
            &corpus,
            last_error,
            timings,
            attempts,
            start,
        )
    }

    /// One pass through `Acquiring → Searching → ValidatingResult → Synthesizing`
    async fn attempt(
        &self,
        correlation_id: &str,
        query: &ValidatedQuery,
        corpus: &Arc<HorizonCorpus>,
        vector: &Arc<Vec<f32>>,
        deadline: tokio::time::Instant,
        timings: &mut Timings,
    ) -> Result<EnsembleResult, ErrorKind> {
        debug!(correlation_id, stage = %Stage::Acquiring);
        let acquire_start = Instant::now();
        let handle = self
            .pool
            .acquire(self.settings.pool.acquire_timeout())
            .await?;
        timings.acquire += millis(acquire_start);
        debug!(correlation_id, stage = %Stage::Searching, "slot {}", handle.slot());

        let (horizon, k) = (query.horizon, query.k);
        let corpus = corpus.clone();
        let vector = vector.clone();
        let validator = self.validator.clone();
        let synthesizer = self.synthesizer.clone();
        let id = correlation_id.to_string();

        // The handle lives inside the blocking task, so it is returned when
        // that work ends even if this attempt has been abandoned.
        let work = tokio::task::spawn_blocking(move || -> Result<AttemptOutcome, ErrorKind> {
            let search_start = Instant::now();
            let retrieval = handle.search(&vector, horizon, k)?;
            let search_ms = millis(search_start);

            debug!(
                correlation_id = %id,
                stage = %Stage::ValidatingResult,
                "{} analogs",
                retrieval.neighbors.len()
            );
            let validate_start = Instant::now();
            validator
                .validate(&retrieval, horizon, k, corpus.len())
                .into_result()
                .map_err(ErrorKind::ValidationFailed)?;
            let validate_ms = millis(validate_start);

            debug!(correlation_id = %id, stage = %Stage::Synthesizing);
            let synthesize_start = Instant::now();
            let ensemble = synthesizer.synthesize(&retrieval, &corpus, k);
            let synthesize_ms = millis(synthesize_start);
            drop(handle);

            Ok(AttemptOutcome {
                ensemble,
                search_ms,
                validate_ms,
                synthesize_ms,
            })
        });

        let outcome = match timeout_at(deadline, work).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(join_err)) => {
                warn!(correlation_id, "Search task failed: {}", join_err);
                return Err(ErrorKind::SearchUnavailable("search task failed".to_string()));
            }
            Err(_) => {
                warn!(
                    correlation_id,
                    "Request deadline of {:?} passed; abandoning attempt",
                    self.settings.resilience.request_timeout()
                );
                return Err(ErrorKind::SearchUnavailable("request timeout".to_string()));
            }
        };

        timings.search += outcome.search_ms;
        timings.validate += outcome.validate_ms;
        timings.synthesize += outcome.synthesize_ms;
        Ok(outcome.ensemble)
    }

    /// Labeled substitute result, or `ServiceUnavailable` when fallback is off
    #[allow(clippy::too_many_arguments)]
    fn fallback_or_unavailable(
        &self,
        correlation_id: &str,
        query: &ValidatedQuery,
        corpus: &HorizonCorpus,
        cause: ErrorKind,
        mut timings: Timings,
        attempts: u32,
        start: Instant,
    ) -> Result<ForecastResponse, ErrorKind> {
        if !self.settings.resilience.fallback_enabled {
            debug!(correlation_id, "Fallback disabled; last failure: {}", cause);
            return Err(ErrorKind::ServiceUnavailable);
        }
        info!(
            correlation_id,
            stage = %Stage::Fallback,
            cause = cause.code(),
            degraded = self.is_degraded(),
            "Serving fallback forecast"
        );

        let retrieval = self.fallback.plan(query.k, corpus.len());
        if let Err(reason) = self
            .validator
            .validate(&retrieval, query.horizon, query.k, corpus.len())
            .into_result()
        {
            warn!(correlation_id, "Fallback retrieval rejected: {}", reason);
            return Err(ErrorKind::ServiceUnavailable);
        }

        let synthesize_start = Instant::now();
        let ensemble = self.synthesizer.synthesize(&retrieval, corpus, query.k);
        timings.synthesize += millis(synthesize_start);
        timings.total = millis(start);

        let metadata = self.metadata(SearchMethod::Fallback, query, corpus, &ensemble, timings, attempts);
        Ok(ForecastResponse::from_ensemble(
            correlation_id.to_string(),
            query,
            ensemble,
            metadata,
        ))
    }

    fn metadata(
        &self,
        method: SearchMethod,
        query: &ValidatedQuery,
        corpus: &HorizonCorpus,
        ensemble: &EnsembleResult,
        timings_ms: Timings,
        attempts: u32,
    ) -> SearchMetadata {
        SearchMetadata {
            method,
            total_candidates: corpus.len(),
            k_used: query.k,
            distance_metric: DISTANCE_METRIC.to_string(),
            timings_ms,
            distances: ensemble.distances.clone(),
            degraded: self.is_degraded(),
            attempts,
        }
    }

    /// Exponential backoff with jitter, capped
    fn backoff(&self, attempt: u32) -> Duration {
        let resilience = &self.settings.resilience;
        let exp = resilience
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(resilience.backoff_max_ms);
        let jitter = rand::thread_rng().gen_range(0..=resilience.backoff_base_ms / 2);
        Duration::from_millis(capped + jitter)
    }
}
