//! Similarity search adapter
//!
//! Runs a nearest-neighbor query against one engine instance and converts
//! the native scores into canonical distances, re-sorted ascending.

use super::traits::SimilarityIndex;
use super::transform::SimilarityTransform;
use super::SearchError;
use crate::forecast::Horizon;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One retrieved analog as the engine reported it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row in the horizon's corpus
    pub index: i64,
    /// Native similarity score
    pub similarity: f32,
}

/// Neighbors as returned by the engine, before the distance transform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborSet {
    pub neighbors: Vec<Neighbor>,
}

impl NeighborSet {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = i64> + '_ {
        self.neighbors.iter().map(|n| n.index)
    }
}

/// Canonical distances, position-aligned with a [`NeighborSet`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceSet {
    pub distances: Vec<f32>,
}

impl DistanceSet {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// A neighbor set and its distances, sorted by ascending distance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub neighbors: NeighborSet,
    pub distances: DistanceSet,
}

impl Retrieval {
    /// Pair neighbors with their distances and sort ascending by distance.
    ///
    /// Non-finite distances sort last so validation reports them.
    pub fn sorted(pairs: Vec<(Neighbor, f32)>) -> Self {
        let mut pairs = pairs;
        pairs.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.index.cmp(&b.0.index)));
        let (neighbors, distances) = pairs.into_iter().unzip();
        Self {
            neighbors: NeighborSet { neighbors },
            distances: DistanceSet { distances },
        }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

/// One pooled search engine instance: an index per loaded horizon
pub struct AnalogEngine {
    id: usize,
    indices: HashMap<Horizon, Arc<dyn SimilarityIndex>>,
    transform: SimilarityTransform,
}

impl AnalogEngine {
    pub fn new(id: usize, transform: SimilarityTransform) -> Self {
        Self {
            id,
            indices: HashMap::new(),
            transform,
        }
    }

    /// Attach the index serving `horizon`
    pub fn with_index(mut self, horizon: Horizon, index: Arc<dyn SimilarityIndex>) -> Self {
        self.indices.insert(horizon, index);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn has_index(&self, horizon: Horizon) -> bool {
        self.indices.contains_key(&horizon)
    }

    pub fn horizons(&self) -> Vec<Horizon> {
        let mut horizons: Vec<_> = self.indices.keys().copied().collect();
        horizons.sort();
        horizons
    }

    /// Query the `horizon` index for the `k` nearest analogs of `query`.
    ///
    /// The dimension is checked exactly; a mismatching vector is never
    /// truncated or padded.
    pub fn search(&self, query: &[f32], horizon: Horizon, k: usize) -> Result<Retrieval, SearchError> {
        let index = self.indices.get(&horizon).ok_or_else(|| {
            SearchError::Unavailable(format!("no index loaded for horizon {}", horizon))
        })?;

        if query.len() != index.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: index.dimension(),
                actual: query.len(),
            });
        }

        let raw = index
            .search(query, k)
            .map_err(|e| SearchError::Unavailable(format!("index search failed: {:#}", e)))?;

        let pairs: Vec<(Neighbor, f32)> = raw
            .into_iter()
            .filter(|&(idx, _)| idx != -1)
            .map(|(index, similarity)| {
                (
                    Neighbor { index, similarity },
                    self.transform.distance(similarity),
                )
            })
            .collect();

        debug!(
            "Engine {} returned {} analogs for horizon {}",
            self.id,
            pairs.len(),
            horizon
        );

        Ok(Retrieval::sorted(pairs))
    }
}
