//! Retrieval validation
//!
//! A retrieval is only trusted after its structure and numbers pass these
//! checks. Every failure names its reason so the orchestrator can choose
//! between retrying and falling back.

use crate::config::ValidationSettings;
use crate::engine::Retrieval;
use crate::forecast::Horizon;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Why a retrieval was rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationReason {
    Empty,
    TooFewResults { got: usize, required: usize },
    TooManyResults { got: usize, k: usize },
    LengthMismatch { indices: usize, distances: usize },
    NonFinite { position: usize },
    NegativeDistance { position: usize, value: f32 },
    ImplausibleDistance { position: usize, value: f32, ceiling: f64 },
    NotMonotonic { position: usize, previous: f32, current: f32 },
    IndexOutOfBounds { position: usize, index: i64, corpus_size: usize },
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooFewResults { .. } => "too_few_results",
            Self::TooManyResults { .. } => "too_many_results",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::NonFinite { .. } => "non_finite_distance",
            Self::NegativeDistance { .. } => "negative_distance",
            Self::ImplausibleDistance { .. } => "implausible_distance",
            Self::NotMonotonic { .. } => "not_monotonic",
            Self::IndexOutOfBounds { .. } => "index_out_of_bounds",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no analogs returned"),
            Self::TooFewResults { got, required } => {
                write!(f, "{} analogs returned, {} required", got, required)
            }
            Self::TooManyResults { got, k } => {
                write!(f, "{} analogs returned for k = {}", got, k)
            }
            Self::LengthMismatch { indices, distances } => {
                write!(f, "{} indices but {} distances", indices, distances)
            }
            Self::NonFinite { position } => write!(f, "distance {} is not finite", position),
            Self::NegativeDistance { position, value } => {
                write!(f, "distance {} is negative ({})", position, value)
            }
            Self::ImplausibleDistance {
                position,
                value,
                ceiling,
            } => write!(f, "distance {} is {} (ceiling {})", position, value, ceiling),
            Self::NotMonotonic {
                position,
                previous,
                current,
            } => write!(
                f,
                "distance {} decreases from {} to {}",
                position, previous, current
            ),
            Self::IndexOutOfBounds {
                position,
                index,
                corpus_size,
            } => write!(
                f,
                "analog {} has index {} outside corpus of {}",
                position, index, corpus_size
            ),
        }
    }
}

/// Outcome of validating one retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationVerdict {
    Pass,
    Fail(ValidationReason),
}

impl ValidationVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn into_result(self) -> Result<(), ValidationReason> {
        match self {
            Self::Pass => Ok(()),
            Self::Fail(reason) => Err(reason),
        }
    }
}

/// Structural and numerical checks on a retrieval
#[derive(Debug, Clone)]
pub struct ResultValidator {
    max_distance: f64,
    tolerance: f64,
    min_results: usize,
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(&ValidationSettings::default())
    }
}

impl ResultValidator {
    pub fn new(settings: &ValidationSettings) -> Self {
        Self {
            max_distance: settings.max_distance,
            tolerance: settings.monotonic_tolerance,
            min_results: settings.min_results,
        }
    }

    /// Validate a retrieval for a `k`-analog query against a corpus of `corpus_size` rows
    pub fn validate(
        &self,
        retrieval: &Retrieval,
        horizon: Horizon,
        k: usize,
        corpus_size: usize,
    ) -> ValidationVerdict {
        let verdict = match self.check(retrieval, k, corpus_size) {
            Ok(()) => ValidationVerdict::Pass,
            Err(reason) => ValidationVerdict::Fail(reason),
        };
        if let ValidationVerdict::Fail(ref reason) = verdict {
            debug!("Retrieval for horizon {} rejected: {}", horizon, reason);
        }
        verdict
    }

    fn check(&self, retrieval: &Retrieval, k: usize, corpus_size: usize) -> Result<(), ValidationReason> {
        let indices = retrieval.neighbors.len();
        let distances = &retrieval.distances.distances;

        if indices == 0 && distances.is_empty() {
            return Err(ValidationReason::Empty);
        }
        if indices != distances.len() {
            return Err(ValidationReason::LengthMismatch {
                indices,
                distances: distances.len(),
            });
        }

        if indices > k {
            return Err(ValidationReason::TooManyResults { got: indices, k });
        }

        let required = k.min(self.min_results).min(corpus_size).max(1);
        if indices < required {
            return Err(ValidationReason::TooFewResults {
                got: indices,
                required,
            });
        }

        for (position, (&d, index)) in distances
            .iter()
            .zip(retrieval.neighbors.indices())
            .enumerate()
        {
            if !d.is_finite() {
                return Err(ValidationReason::NonFinite { position });
            }
            if d < 0.0 {
                return Err(ValidationReason::NegativeDistance { position, value: d });
            }
            if d as f64 >= self.max_distance {
                return Err(ValidationReason::ImplausibleDistance {
                    position,
                    value: d,
                    ceiling: self.max_distance,
                });
            }
            if index < 0 || index as u64 >= corpus_size as u64 {
                return Err(ValidationReason::IndexOutOfBounds {
                    position,
                    index,
                    corpus_size,
                });
            }
            if position > 0 {
                let previous = distances[position - 1];
                if (d as f64) < previous as f64 - self.tolerance {
                    return Err(ValidationReason::NotMonotonic {
                        position,
                        previous,
                        current: d,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DistanceSet, Neighbor, NeighborSet};

    fn retrieval(pairs: &[(i64, f32)]) -> Retrieval {
        Retrieval {
            neighbors: NeighborSet {
                neighbors: pairs
                    .iter()
                    .map(|&(index, _)| Neighbor {
                        index,
                        similarity: 3.0,
                    })
                    .collect(),
            },
            distances: DistanceSet {
                distances: pairs.iter().map(|&(_, d)| d).collect(),
            },
        }
    }

    fn ascending(n: usize) -> Vec<(i64, f32)> {
        (0..n).map(|i| (i as i64, 0.1 * i as f32)).collect()
    }

    fn fail_code(verdict: ValidationVerdict) -> &'static str {
        match verdict {
            ValidationVerdict::Fail(reason) => reason.code(),
            ValidationVerdict::Pass => "pass",
        }
    }

    #[test]
    fn test_valid_retrieval_passes() {
        let v = ResultValidator::default();
        let verdict = v.validate(&retrieval(&ascending(10)), Horizon::H24, 10, 100);
        assert!(verdict.is_pass());
    }

    #[test]
    fn test_empty_rejected() {
        let v = ResultValidator::default();
        assert_eq!(
            v.validate(&retrieval(&[]), Horizon::H24, 10, 100),
            ValidationVerdict::Fail(ValidationReason::Empty)
        );
    }

    #[test]
    fn test_count_requirement() {
        let v = ResultValidator::default();
        // k = 50 needs min(50, 10) = 10
        assert_eq!(
            fail_code(v.validate(&retrieval(&ascending(9)), Horizon::H24, 50, 100)),
            "too_few_results"
        );
        assert!(v
            .validate(&retrieval(&ascending(10)), Horizon::H24, 50, 100)
            .is_pass());
        // k = 4 needs 4
        assert!(v
            .validate(&retrieval(&ascending(4)), Horizon::H24, 4, 100)
            .is_pass());
        // a corpus smaller than the requirement lowers it
        assert!(v
            .validate(&retrieval(&ascending(6)), Horizon::H24, 10, 6)
            .is_pass());
    }

    #[test]
    fn test_more_than_k_rejected() {
        let v = ResultValidator::default();
        assert_eq!(
            v.validate(&retrieval(&ascending(25)), Horizon::H24, 10, 100),
            ValidationVerdict::Fail(ValidationReason::TooManyResults { got: 25, k: 10 })
        );
        assert_eq!(
            v.validate(&retrieval(&ascending(11)), Horizon::H24, 10, 100)
                .into_result()
                .map_err(|reason| reason.code()),
            Err("too_many_results")
        );
        assert_eq!(
            v.validate(&retrieval(&ascending(10)), Horizon::H24, 10, 100).into_result(),
            Ok(())
        );
    }

    #[test]
    fn test_length_mismatch() {
        let v = ResultValidator::default();
        let mut r = retrieval(&ascending(10));
        r.distances.distances.pop();
        assert_eq!(
            fail_code(v.validate(&r, Horizon::H24, 10, 100)),
            "length_mismatch"
        );
    }

    #[test]
    fn test_monotonic_within_tolerance() {
        let v = ResultValidator::default();
        let mut pairs = ascending(10);
        pairs[5].1 = pairs[4].1 - 5e-7;
        assert!(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100).is_pass());

        pairs[5].1 = pairs[4].1 - 1e-3;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "not_monotonic"
        );
    }

    #[test]
    fn test_numeric_checks() {
        let v = ResultValidator::default();

        let mut pairs = ascending(10);
        pairs[9].1 = f32::NAN;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "non_finite_distance"
        );

        let mut pairs = ascending(10);
        pairs[0].1 = -0.5;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "negative_distance"
        );

        let mut pairs = ascending(10);
        pairs[9].1 = 12.0;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "implausible_distance"
        );
    }

    #[test]
    fn test_index_bounds() {
        let v = ResultValidator::default();
        let mut pairs = ascending(10);
        pairs[3].0 = 100;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "index_out_of_bounds"
        );
        pairs[3].0 = -2;
        assert_eq!(
            fail_code(v.validate(&retrieval(&pairs), Horizon::H24, 10, 100)),
            "index_out_of_bounds"
        );
    }

    #[test]
    fn test_custom_ceiling() {
        let v = ResultValidator::new(&ValidationSettings {
            max_distance: 0.5,
            ..Default::default()
        });
        assert_eq!(
            fail_code(v.validate(&retrieval(&ascending(10)), Horizon::H24, 10, 100)),
            "implausible_distance"
        );
    }
}
