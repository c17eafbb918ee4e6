//! Labeled substitute retrieval used when the real path cannot serve

use crate::engine::{Neighbor, Retrieval, SimilarityTransform};

/// Distance of the first synthetic analog
const BASE_DISTANCE: f32 = 0.5;
/// Increment between consecutive synthetic analogs
const DISTANCE_STEP: f32 = 0.01;

/// Builds a structurally valid retrieval without touching any engine.
///
/// Indices are spread evenly across the corpus and distances grow strictly,
/// so the result passes the same validator as a real retrieval. Responses
/// built from it are always tagged as fallback by the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPlanner {
    transform: SimilarityTransform,
}

impl FallbackPlanner {
    pub fn new(transform: SimilarityTransform) -> Self {
        Self { transform }
    }

    pub fn plan(&self, k: usize, corpus_size: usize) -> Retrieval {
        let n = k.min(corpus_size);
        if n == 0 {
            return Retrieval::default();
        }
        let stride = (corpus_size / n).max(1);

        let pairs = (0..n)
            .map(|i| {
                let distance = BASE_DISTANCE + DISTANCE_STEP * i as f32;
                let neighbor = Neighbor {
                    index: (i * stride) as i64,
                    similarity: self.transform.raw_for_distance(distance),
                };
                (neighbor, distance)
            })
            .collect();
        Retrieval::sorted(pairs)
    }
}
