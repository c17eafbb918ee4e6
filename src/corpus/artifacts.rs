//! Immutable per-horizon corpus artifacts

use crate::engine::SimilarityIndex;
use crate::forecast::Horizon;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Historical outcomes, row-major `[rows × variables]`, stored at 32-bit precision
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeTable {
    variables: Vec<String>,
    values: Vec<f32>,
}

impl OutcomeTable {
    pub fn new(variables: Vec<String>, values: Vec<f32>) -> Result<Self> {
        if variables.is_empty() {
            bail!("outcome table has no variables");
        }
        if values.len() % variables.len() != 0 {
            bail!(
                "outcome table holds {} values, not a multiple of {} variables",
                values.len(),
                variables.len()
            );
        }
        Ok(Self { variables, values })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn rows(&self) -> usize {
        self.values.len() / self.variables.len()
    }

    /// Column position of a variable
    pub fn column(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }

    /// Stored value; `None` when out of bounds
    pub fn value(&self, row: usize, column: usize) -> Option<f32> {
        if column >= self.variables.len() || row >= self.rows() {
            return None;
        }
        self.values.get(row * self.variables.len() + column).copied()
    }
}

/// Index, historical timestamps and outcomes for one horizon
pub struct HorizonCorpus {
    pub horizon: Horizon,
    pub index: Arc<dyn SimilarityIndex>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub outcomes: OutcomeTable,
}

impl HorizonCorpus {
    /// Assemble the parallel tables, checking that they line up
    pub fn new(
        horizon: Horizon,
        index: Arc<dyn SimilarityIndex>,
        timestamps: Vec<DateTime<Utc>>,
        outcomes: OutcomeTable,
    ) -> Result<Self> {
        let rows = index.len();
        if timestamps.len() != rows {
            bail!(
                "horizon {}: {} timestamps for {} indexed vectors",
                horizon,
                timestamps.len(),
                rows
            );
        }
        if outcomes.rows() != rows {
            bail!(
                "horizon {}: {} outcome rows for {} indexed vectors",
                horizon,
                outcomes.rows(),
                rows
            );
        }
        Ok(Self {
            horizon,
            index,
            timestamps,
            outcomes,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }
}

/// Read-only map from horizon to its corpus
#[derive(Default)]
pub struct CorpusStore {
    corpora: HashMap<Horizon, Arc<HorizonCorpus>>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, corpus: HorizonCorpus) {
        self.corpora.insert(corpus.horizon, Arc::new(corpus));
    }

    pub fn get(&self, horizon: Horizon) -> Option<Arc<HorizonCorpus>> {
        self.corpora.get(&horizon).cloned()
    }

    /// Loaded horizons, ascending
    pub fn horizons(&self) -> Vec<Horizon> {
        let mut horizons: Vec<_> = self.corpora.keys().copied().collect();
        horizons.sort();
        horizons
    }

    pub fn len(&self) -> usize {
        self.corpora.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpora.is_empty()
    }
}
