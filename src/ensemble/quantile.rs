//! Weighted quantiles with a brief precision promotion
//!
//! Outcomes are stored as `f32`. Sorting and interpolation run in `f64` so
//! that accumulating many small weights does not bias the result; only the
//! final quantiles are cast back to `f32`.

use std::cmp::Ordering;

/// Quantiles reported for every variable: p05, median, p95
pub const FORECAST_QUANTILES: [f64; 3] = [0.05, 0.5, 0.95];

/// Weighted quantiles of `values` at each `q` in `quantiles`.
///
/// Values are sorted ascending and the cumulative weight is normalized to
/// end at 1. A `q` at or below the first cumulative weight yields the
/// minimum, at or above the last yields the maximum; anything between is
/// interpolated linearly between the two bracketing values.
///
/// The caller guarantees `values.len() == weights.len()`, a non-empty input
/// and a positive total weight.
pub fn weighted_quantiles(values: &[f32], weights: &[f64], quantiles: &[f64]) -> Vec<f32> {
    debug_assert_eq!(values.len(), weights.len());
    debug_assert!(!values.is_empty());

    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .map(|(&v, &w)| (v as f64, w))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    debug_assert!(total > 0.0, "weighted quantile over zero weight mass");

    let mut cumulative = Vec::with_capacity(pairs.len());
    let mut running = 0.0;
    for (_, w) in &pairs {
        running += w;
        cumulative.push(running / total);
    }

    let first = cumulative[0];
    let last = cumulative[cumulative.len() - 1];

    quantiles
        .iter()
        .map(|&q| {
            if q <= first {
                return pairs[0].0 as f32;
            }
            if q >= last {
                return pairs[pairs.len() - 1].0 as f32;
            }

            // first position whose cumulative weight reaches q; always >= 1 here
            let hi = cumulative.partition_point(|&c| c < q);
            let lo = hi - 1;
            let (c0, c1) = (cumulative[lo], cumulative[hi]);
            let (v0, v1) = (pairs[lo].0, pairs[hi].0);

            if c1 <= c0 {
                return v1 as f32;
            }
            let t = (q - c0) / (c1 - c0);
            (v0 + t * (v1 - v0)) as f32
        })
        .collect()
}

/// Convenience wrapper returning `(p05, median, p95)`
pub fn forecast_quantiles(values: &[f32], weights: &[f64]) -> (f32, f32, f32) {
    let q = weighted_quantiles(values, weights, &FORECAST_QUANTILES);
    (q[0], q[1], q[2])
}
