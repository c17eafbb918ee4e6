//! Settings structures for the forecasting service

use crate::forecast::Horizon;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides (`ANALOG_POOL__CAPACITY=8`)
pub const ENV_PREFIX: &str = "ANALOG";

/// Top-level settings, built once at start-up and never mutated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub pool: PoolSettings,
    pub search: SearchSettings,
    pub validation: ValidationSettings,
    pub synthesis: SynthesisSettings,
    pub resilience: ResilienceSettings,
    pub corpus: CorpusSettings,
    pub cache: CacheSettings,
}

impl Settings {
    /// Layer compiled defaults, an optional YAML file and `ANALOG_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Yaml),
            );
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file without environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(
                config::File::from(path.as_ref().to_path_buf())
                    .format(config::FileFormat::Yaml),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject inconsistent values before anything is built from them
    pub fn validate(&self) -> Result<()> {
        if self.pool.capacity == 0 {
            bail!("pool.capacity must be at least 1");
        }
        if self.pool.acquire_timeout_ms == 0 {
            bail!("pool.acquire_timeout_ms must be positive");
        }
        if self.search.dimension == 0 {
            bail!("search.dimension must be positive");
        }
        if !(self.search.similarity_scale > 0.0) {
            bail!("search.similarity_scale must be positive");
        }
        if !(self.validation.max_distance > 0.0) {
            bail!("validation.max_distance must be positive");
        }
        if !(self.synthesis.temperature > 0.0) {
            bail!("synthesis.temperature must be positive");
        }
        if !(0.0..=1.0).contains(&self.synthesis.confidence_blend) {
            bail!("synthesis.confidence_blend must lie in [0, 1]");
        }
        if self.synthesis.variables.is_empty() {
            bail!("synthesis.variables must name at least one variable");
        }
        for var in &self.synthesis.variables {
            if !(var.min < var.max) {
                bail!(
                    "physical range for {} is empty: [{}, {}]",
                    var.name,
                    var.min,
                    var.max
                );
            }
        }
        if self.resilience.request_timeout_ms == 0 {
            bail!("resilience.request_timeout_ms must be positive");
        }
        if self.corpus.horizons.is_empty() {
            bail!("corpus.horizons must list at least one horizon");
        }
        for &hours in &self.corpus.horizons {
            if Horizon::try_from(hours as i64).is_err() {
                bail!("corpus.horizons contains unsupported lead time {}h", hours);
            }
        }
        if self.corpus.source == CorpusSource::Directory && self.corpus.path.is_none() {
            bail!("corpus.path is required when corpus.source is 'directory'");
        }
        Ok(())
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Enable debug logging
    pub debug: bool,
    /// Instance name reported by the health endpoint
    pub instance_name: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            debug: false,
            instance_name: "analog-ensemble".to_string(),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8890,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of independent search engine instances
    pub capacity: usize,
    /// Hard deadline for `acquire`
    pub acquire_timeout_ms: u64,
    /// How long shutdown waits for outstanding handles
    pub drain_timeout_ms: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 4,
            acquire_timeout_ms: 2_000,
            drain_timeout_ms: 5_000,
        }
    }
}

/// Similarity search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Declared embedding dimension; queries must match it exactly
    pub dimension: usize,
    /// `cos = (s - offset) / scale`
    pub similarity_offset: f64,
    pub similarity_scale: f64,
    /// Probe each index with its own vectors at start-up
    pub calibrate: bool,
    pub calibration_samples: usize,
    pub calibration_tolerance: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            dimension: 256,
            similarity_offset: 2.0,
            similarity_scale: 2.0,
            calibrate: true,
            calibration_samples: 8,
            calibration_tolerance: 1e-3,
        }
    }
}

/// Retrieval validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Plausibility ceiling in normalized distance space
    pub max_distance: f64,
    /// Slack allowed when checking the ascending distance order
    pub monotonic_tolerance: f64,
    /// Required result count is `min(k, min_results)` unless the corpus is smaller
    pub min_results: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_distance: 10.0,
            monotonic_tolerance: 1e-6,
            min_results: 10,
        }
    }
}

/// Physical range of one output variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRange {
    pub name: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
}

impl VariableRange {
    pub fn new(name: &str, unit: &str, min: f32, max: f32) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            min,
            max,
        }
    }

    /// Finite and inside `[min, max]`
    pub fn accepts(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Ensemble synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Softmax temperature applied to neighbor similarities
    pub temperature: f64,
    /// Number of neighbors reported as provenance
    pub top_n: usize,
    /// A variable needs at least `max(min_valid_floor, k / 4)` valid neighbors
    pub min_valid_floor: usize,
    /// Weight of mean similarity against weight concentration in the confidence score
    pub confidence_blend: f64,
    pub variables: Vec<VariableRange>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_n: 5,
            min_valid_floor: 3,
            confidence_blend: 0.5,
            variables: default_variables(),
        }
    }
}

/// Retry and fallback policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Additional attempts after the first
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Bound on the search-to-synthesis span of one attempt
    pub request_timeout_ms: u64,
    /// Substitute a labeled fallback result instead of failing
    pub fallback_enabled: bool,
}

impl ResilienceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 25,
            backoff_max_ms: 250,
            request_timeout_ms: 5_000,
            fallback_enabled: true,
        }
    }
}

/// Where corpus artifacts come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusSource {
    /// Deterministic generated corpus
    #[default]
    Synthetic,
    /// JSON artifacts under `corpus.path`
    Directory,
}

/// Corpus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub source: CorpusSource,
    pub path: Option<PathBuf>,
    pub synthetic_size: usize,
    pub seed: u64,
    /// Lead times (hours) to load
    pub horizons: Vec<u32>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            source: CorpusSource::Synthetic,
            path: None,
            synthetic_size: 13_148,
            seed: 42,
            horizons: vec![6, 12, 24, 48],
        }
    }
}

/// Embedding cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub embedding_ttl_secs: u64,
    pub embedding_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            embedding_ttl_secs: 600,
            embedding_capacity: 4_096,
        }
    }
}

/// Output variables and their physical ranges
fn default_variables() -> Vec<VariableRange> {
    vec![
        VariableRange::new("t2m", "K", 200.0, 350.0),
        VariableRange::new("u10", "m/s", -100.0, 100.0),
        VariableRange::new("v10", "m/s", -100.0, 100.0),
        VariableRange::new("msl", "Pa", 85_000.0, 110_000.0),
    ]
}
