//! Corpus loaders: start-up readers of the immutable artifacts

use super::artifacts::{CorpusStore, HorizonCorpus, OutcomeTable};
use crate::config::VariableRange;
use crate::engine::{normalize, FlatInnerProductIndex};
use crate::forecast::Horizon;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Loads the index, timestamps and outcomes for one horizon
pub trait CorpusLoader: Send + Sync {
    fn load(&self, horizon: Horizon, dimension: usize) -> Result<HorizonCorpus>;
}

impl CorpusStore {
    /// Load every requested horizon. Horizons that fail to load are skipped;
    /// loading nothing at all is an error.
    pub fn load(loader: &dyn CorpusLoader, horizons: &[Horizon], dimension: usize) -> Result<Self> {
        let mut store = CorpusStore::new();

        for &horizon in horizons {
            match loader.load(horizon, dimension) {
                Ok(corpus) => {
                    if corpus.dimension() != dimension {
                        warn!(
                            "Skipping horizon {}: index dimension {} does not match configured {}",
                            horizon,
                            corpus.dimension(),
                            dimension
                        );
                        continue;
                    }
                    info!("Loaded corpus for horizon {}: {} analogs", horizon, corpus.len());
                    store.insert(corpus);
                }
                Err(e) => {
                    warn!("Failed to load corpus for horizon {}: {:#}", horizon, e);
                }
            }
        }

        if store.is_empty() {
            bail!("no corpus could be loaded for any horizon");
        }
        Ok(store)
    }
}

/// First timestamp of generated corpora
const SYNTHETIC_EPOCH_SECS: i64 = 283_996_800; // 1979-01-01T00:00:00Z

/// Deterministic generated corpus.
///
/// Rows are random unit vectors; outcomes track the first components of
/// each vector plus noise, so nearby analogs have similar outcomes. A small
/// share of first-variable outcomes is missing or physically implausible.
pub struct SyntheticCorpusLoader {
    size: usize,
    seed: u64,
    variables: Vec<VariableRange>,
}

impl SyntheticCorpusLoader {
    pub fn new(size: usize, seed: u64, variables: Vec<VariableRange>) -> Self {
        Self {
            size,
            seed,
            variables,
        }
    }
}

impl CorpusLoader for SyntheticCorpusLoader {
    fn load(&self, horizon: Horizon, dimension: usize) -> Result<HorizonCorpus> {
        if self.size == 0 {
            bail!("synthetic corpus size must be positive");
        }
        let mut rng =
            StdRng::seed_from_u64(self.seed.wrapping_mul(31).wrapping_add(horizon.hours() as u64));

        let mut data = Vec::with_capacity(self.size * dimension);
        let mut values = Vec::with_capacity(self.size * self.variables.len());
        let mut timestamps = Vec::with_capacity(self.size);
        let signal_scale = (dimension as f32 / 3.0).sqrt();

        for row in 0..self.size {
            let mut vector: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
            normalize(&mut vector);

            for (col, var) in self.variables.iter().enumerate() {
                let mid = (var.min + var.max) / 2.0;
                let span = var.max - var.min;
                let signal = (vector[col % dimension] * signal_scale).clamp(-1.0, 1.0);
                let noise: f32 = rng.gen_range(-0.05..0.05);
                let mut value = mid + span * (0.25 * signal + noise);

                if col == 0 && row % 997 == 13 {
                    value = f32::NAN;
                } else if col == 0 && row % 1499 == 7 {
                    value = var.max + span;
                }
                values.push(value);
            }

            let secs = SYNTHETIC_EPOCH_SECS + row as i64 * 86_400;
            let timestamp = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| anyhow!("timestamp out of range for row {}", row))?;
            timestamps.push(timestamp);
            data.extend_from_slice(&vector);
        }

        let index = FlatInnerProductIndex::from_rows(dimension, data)?;
        let names = self.variables.iter().map(|v| v.name.clone()).collect();
        let outcomes = OutcomeTable::new(names, values)?;

        HorizonCorpus::new(horizon, Arc::new(index), timestamps, outcomes)
    }
}

/// On-disk artifact for one horizon (`<root>/h{hours}.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonArtifactFile {
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub variables: Vec<String>,
    /// `null` marks a missing observation
    pub outcomes: Vec<Vec<Option<f32>>>,
}

/// Reads pre-built JSON artifacts from a directory
pub struct DirectoryCorpusLoader {
    root: PathBuf,
}

impl DirectoryCorpusLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn artifact_path(&self, horizon: Horizon) -> PathBuf {
        self.root.join(format!("h{}.json", horizon.hours()))
    }

    fn read(path: &Path) -> Result<HorizonArtifactFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let artifact = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(artifact)
    }
}

impl CorpusLoader for DirectoryCorpusLoader {
    fn load(&self, horizon: Horizon, dimension: usize) -> Result<HorizonCorpus> {
        let artifact = Self::read(&self.artifact_path(horizon))?;

        if artifact.dimension != dimension {
            bail!(
                "artifact dimension {} does not match configured dimension {}",
                artifact.dimension,
                dimension
            );
        }

        let mut data = Vec::with_capacity(artifact.vectors.len() * dimension);
        for (row, vector) in artifact.vectors.iter().enumerate() {
            if vector.len() != dimension {
                bail!("vector {} has {} components, expected {}", row, vector.len(), dimension);
            }
            data.extend_from_slice(vector);
        }

        let mut values = Vec::with_capacity(artifact.outcomes.len() * artifact.variables.len());
        for (row, outcome) in artifact.outcomes.iter().enumerate() {
            if outcome.len() != artifact.variables.len() {
                bail!(
                    "outcome row {} has {} values, expected {}",
                    row,
                    outcome.len(),
                    artifact.variables.len()
                );
            }
            values.extend(outcome.iter().map(|v| v.unwrap_or(f32::NAN)));
        }

        let index = FlatInnerProductIndex::from_rows(dimension, data)?;
        let outcomes = OutcomeTable::new(artifact.variables, values)?;
        HorizonCorpus::new(horizon, Arc::new(index), artifact.timestamps, outcomes)
    }
}
