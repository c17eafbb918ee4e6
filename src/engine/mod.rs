//! Similarity engine module
//!
//! Defines the index and embedder collaborator traits, the exhaustive
//! extended-inner-product index, the similarity-to-distance transform and
//! the pooled [`AnalogEngine`] that ties them together.

mod adapter;
mod flat;
mod loader;
mod traits;
mod transform;

pub use adapter::{AnalogEngine, DistanceSet, Neighbor, NeighborSet, Retrieval};
pub use flat::{normalize, FlatInnerProductIndex};
pub use loader::EngineFactory;
pub use traits::*;
pub use transform::{cosine_from_distance, CalibrationError, CalibrationReport, SimilarityTransform};

use thiserror::Error;

/// Search failures reported by an engine instance
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Missing or broken index for the horizon
    #[error("search unavailable: {0}")]
    Unavailable(String),

    /// Query vector dimension differs from the index's declared dimension
    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}
