//! Exhaustive extended-inner-product index

use super::traits::SimilarityIndex;
use anyhow::{bail, Result};
use std::cmp::Ordering;

/// Brute-force index over L2-normalized rows.
///
/// Reports the extended inner product `s = 2 + 2·⟨q, x⟩`, which lies in
/// `[0, 4]` for unit vectors.
pub struct FlatInnerProductIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatInnerProductIndex {
    /// Build from row-major data; every row is normalized to unit length
    pub fn from_rows(dimension: usize, mut data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            bail!("index dimension must be positive");
        }
        if data.len() % dimension != 0 {
            bail!(
                "index data length {} is not a multiple of dimension {}",
                data.len(),
                dimension
            );
        }
        for row in data.chunks_mut(dimension) {
            normalize(row);
        }
        Ok(Self { dimension, data })
    }

    fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }
}

/// Scale `v` to unit length; zero vectors are left untouched
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn by_score_desc(a: &(i64, f32), b: &(i64, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

impl SimilarityIndex for FlatInnerProductIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.dimension {
            bail!(
                "query has {} components, index expects {}",
                query.len(),
                self.dimension
            );
        }

        let mut scored: Vec<(i64, f32)> = self
            .data
            .chunks(self.dimension)
            .enumerate()
            .map(|(i, row)| {
                let dot: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
                (i as i64, 2.0 + 2.0 * dot)
            })
            .collect();

        let take = k.min(scored.len());
        if take > 0 && take < scored.len() {
            scored.select_nth_unstable_by(take - 1, by_score_desc);
            scored.truncate(take);
        }
        scored.sort_by(by_score_desc);

        // unfilled slots, as the native index reports them
        scored.resize(k, (-1, f32::NEG_INFINITY));
        Ok(scored)
    }

    fn reconstruct(&self, index: usize) -> Option<Vec<f32>> {
        (index < self.len()).then(|| self.row(index).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_index() -> FlatInnerProductIndex {
        // three unit axes in 3D
        FlatInnerProductIndex::from_rows(3, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            .unwrap()
    }

    #[test]
    fn test_rows_are_normalized() {
        let index = FlatInnerProductIndex::from_rows(2, vec![3.0, 4.0]).unwrap();
        let row = index.reconstruct(0).unwrap();
        assert!((row[0] - 0.6).abs() < 1e-6);
        assert!((row[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_ragged_data() {
        assert!(FlatInnerProductIndex::from_rows(3, vec![1.0; 7]).is_err());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = axis_index();
        let mut query = vec![0.9, 0.1, 0.0];
        normalize(&mut query);

        let hits = index.search(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
        assert!(hits[0].1 >= hits[1].1 && hits[1].1 >= hits[2].1);
        // identical direction scores the top of the range
        let exact = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert!((exact[0].1 - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_pads_missing_slots() {
        let index = axis_index();
        let hits = index.search(&[0.0, 0.0, 1.0], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[3].0, -1);
        assert_eq!(hits[4].0, -1);
    }

    #[test]
    fn test_search_dimension_checked() {
        let index = axis_index();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }
}
