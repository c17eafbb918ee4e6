//! Deterministic embedder

use crate::engine::{normalize, Embedder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Derives a unit vector from a SHA-256 of the query time.
///
/// Identical query times always embed identically.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn seed(query_time: &DateTime<Utc>) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(query_time.timestamp().to_le_bytes());
        hasher.update(query_time.timestamp_subsec_nanos().to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Synchronous form of [`Embedder::embed`]
    pub fn vector(&self, query_time: &DateTime<Utc>) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(Self::seed(query_time));
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, query_time: DateTime<Utc>) -> anyhow::Result<Vec<f32>> {
        Ok(self.vector(&query_time))
    }
}
