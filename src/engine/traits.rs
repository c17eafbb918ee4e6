//! Collaborator traits for the similarity engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A read-only nearest-neighbor index over L2-normalized vectors.
///
/// Scores are the index family's native similarity (higher is closer) and
/// results come back ordered by that score, descending. Slots the index
/// could not fill are reported with index `-1`.
pub trait SimilarityIndex: Send + Sync {
    /// Declared vector dimension
    fn dimension(&self) -> usize;

    /// Number of stored vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`k` neighbors of `query` as `(corpus index, raw similarity)`
    fn search(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<(i64, f32)>>;

    /// Copy of a stored vector, used to probe the index at start-up
    fn reconstruct(&self, index: usize) -> Option<Vec<f32>>;
}

/// Turns the observation valid at `query_time` into a normalized feature vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of the vectors this embedder produces
    fn dimension(&self) -> usize;

    async fn embed(&self, query_time: DateTime<Utc>) -> anyhow::Result<Vec<f32>>;
}
