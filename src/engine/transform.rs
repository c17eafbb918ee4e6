//! Conversion from native similarity scores to canonical distances
//!
//! The index reports an extended inner product `s` over unit vectors. With
//! the default constants (`offset = 2`, `scale = 2`):
//!
//! ```text
//! cos = (s - 2) / 2
//! d²  = max(0, 2 - 2·cos)
//! d   = √d²
//! ```
//!
//! The constants describe one index family. [`SimilarityTransform::calibrate`]
//! checks them against a loaded index before it is trusted.

use super::traits::SimilarityIndex;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    offset: f64,
    scale: f64,
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::new(2.0, 2.0)
    }
}

impl SimilarityTransform {
    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// Canonical cosine similarity for a raw score
    pub fn cosine(&self, raw: f32) -> f64 {
        (raw as f64 - self.offset) / self.scale
    }

    /// Canonical distance for a raw score; non-finite scores stay non-finite
    pub fn distance(&self, raw: f32) -> f32 {
        if !raw.is_finite() {
            return f32::NAN;
        }
        let cos = self.cosine(raw);
        let squared = (2.0 - 2.0 * cos).max(0.0);
        squared.sqrt() as f32
    }

    /// Raw score that maps to `distance`
    pub fn raw_for_distance(&self, distance: f32) -> f32 {
        let cos = cosine_from_distance(distance);
        (self.offset + self.scale * cos) as f32
    }

    /// Probe `index` with `samples` of its own vectors: the best hit for a
    /// stored vector must map to `cos ≈ 1`.
    pub fn calibrate(
        &self,
        index: &dyn SimilarityIndex,
        samples: usize,
        tolerance: f64,
    ) -> Result<CalibrationReport, CalibrationError> {
        let len = index.len();
        if len == 0 {
            return Err(CalibrationError::EmptyIndex);
        }

        let samples = samples.clamp(1, len);
        let mut max_deviation = 0.0f64;

        for j in 0..samples {
            let row = j * len / samples;
            let vector = index
                .reconstruct(row)
                .ok_or(CalibrationError::Unreadable { row })?;
            let hits = index
                .search(&vector, 1)
                .map_err(|e| CalibrationError::SearchFailed(format!("{:#}", e)))?;
            let score = hits
                .first()
                .filter(|(idx, _)| *idx >= 0)
                .map(|(_, s)| *s)
                .ok_or(CalibrationError::Unreadable { row })?;

            let deviation = (self.cosine(score) - 1.0).abs();
            if !deviation.is_finite() || deviation > tolerance {
                return Err(CalibrationError::OutOfTolerance {
                    row,
                    raw: score,
                    cosine: self.cosine(score),
                    tolerance,
                });
            }
            max_deviation = max_deviation.max(deviation);
        }

        Ok(CalibrationReport {
            samples,
            max_deviation,
        })
    }
}

/// Cosine similarity of two unit vectors at Euclidean distance `d`
pub fn cosine_from_distance(distance: f32) -> f64 {
    let d = distance as f64;
    (1.0 - d * d / 2.0).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub samples: usize,
    pub max_deviation: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationError {
    #[error("index is empty")]
    EmptyIndex,

    #[error("stored vector {row} could not be probed")]
    Unreadable { row: usize },

    #[error("probe search failed: {0}")]
    SearchFailed(String),

    #[error("self-similarity of row {row} is {raw} (cos {cosine:.4}), expected cos 1 ± {tolerance}")]
    OutOfTolerance {
        row: usize,
        raw: f32,
        cosine: f64,
        tolerance: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FlatInnerProductIndex;

    struct PlainInnerProduct(FlatInnerProductIndex);

    impl SimilarityIndex for PlainInnerProduct {
        fn dimension(&self) -> usize {
            self.0.dimension()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn search(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<(i64, f32)>> {
            // report ⟨q, x⟩ instead of 2 + 2⟨q, x⟩
            Ok(self
                .0
                .search(query, k)?
                .into_iter()
                .map(|(i, s)| (i, (s - 2.0) / 2.0))
                .collect())
        }
        fn reconstruct(&self, index: usize) -> Option<Vec<f32>> {
            self.0.reconstruct(index)
        }
    }

    fn sample_index() -> FlatInnerProductIndex {
        FlatInnerProductIndex::from_rows(
            2,
            vec![1.0, 0.0, 0.0, 1.0, 0.6, 0.8, -1.0, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_identity_maps_to_zero_distance() {
        let t = SimilarityTransform::default();
        assert_eq!(t.cosine(4.0), 1.0);
        assert_eq!(t.distance(4.0), 0.0);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let t = SimilarityTransform::default();
        assert!((t.distance(2.0) - 2f32.sqrt()).abs() < 1e-6);
        assert!((t.distance(0.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_rounding_above_range_clamps() {
        let t = SimilarityTransform::default();
        // s slightly above 4 would give a negative d²
        assert_eq!(t.distance(4.000_001), 0.0);
    }

    #[test]
    fn test_non_finite_preserved() {
        let t = SimilarityTransform::default();
        assert!(t.distance(f32::NAN).is_nan());
        assert!(t.distance(f32::NEG_INFINITY).is_nan());
    }

    #[test]
    fn test_distance_decreases_with_similarity() {
        let t = SimilarityTransform::default();
        let mut previous = f32::INFINITY;
        for step in 0..=40 {
            let s = step as f32 * 0.1;
            let d = t.distance(s);
            assert!(d <= previous);
            previous = d;
        }
    }

    #[test]
    fn test_raw_for_distance_inverts() {
        let t = SimilarityTransform::default();
        for d in [0.0f32, 0.3, 1.0, 1.7] {
            let back = t.distance(t.raw_for_distance(d));
            assert!((back - d).abs() < 1e-3, "{} -> {}", d, back);
        }
    }

    #[test]
    fn test_calibration_accepts_extended_inner_product() {
        let t = SimilarityTransform::default();
        let report = t.calibrate(&sample_index(), 4, 1e-3).unwrap();
        assert_eq!(report.samples, 4);
        assert!(report.max_deviation < 1e-3);
    }

    #[test]
    fn test_calibration_rejects_other_families() {
        let t = SimilarityTransform::default();
        let index = PlainInnerProduct(sample_index());
        let err = t.calibrate(&index, 4, 1e-3).unwrap_err();
        assert!(matches!(err, CalibrationError::OutOfTolerance { .. }));

        // the matching constants accept it
        let plain = SimilarityTransform::new(0.0, 1.0);
        assert!(plain.calibrate(&index, 4, 1e-3).is_ok());
    }
}
