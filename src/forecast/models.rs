//! Forecast request and response models

use crate::ensemble::{AnalogProvenance, EnsembleResult, VariableForecast};
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Largest number of analogs a query may request
pub const MAX_K: usize = 200;

/// Supported forecast lead times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub enum Horizon {
    H6,
    H12,
    H24,
    H48,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [Horizon::H6, Horizon::H12, Horizon::H24, Horizon::H48];

    /// Lead time in hours
    pub fn hours(self) -> u32 {
        match self {
            Self::H6 => 6,
            Self::H12 => 12,
            Self::H24 => 24,
            Self::H48 => 48,
        }
    }
}

impl TryFrom<i64> for Horizon {
    type Error = ErrorKind;

    fn try_from(hours: i64) -> Result<Self, Self::Error> {
        match hours {
            6 => Ok(Self::H6),
            12 => Ok(Self::H12),
            24 => Ok(Self::H24),
            48 => Ok(Self::H48),
            other => Err(ErrorKind::InvalidRequest(format!(
                "unsupported horizon {}h (expected one of 6, 12, 24, 48)",
                other
            ))),
        }
    }
}

impl From<Horizon> for u32 {
    fn from(horizon: Horizon) -> Self {
        horizon.hours()
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

/// A forecast request as received from the caller.
///
/// `horizon` and `k` stay unvalidated integers here so that bad values are
/// reported as `invalid_request` rather than rejected by deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub horizon: i64,
    pub k: i64,
    pub query_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl QueryRequest {
    pub fn new(horizon: i64, k: i64, query_time: DateTime<Utc>) -> Self {
        Self {
            horizon,
            k,
            query_time,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Check horizon and k; nothing is acquired for a request that fails here
    pub fn validate(&self) -> Result<ValidatedQuery, ErrorKind> {
        let horizon = Horizon::try_from(self.horizon)?;
        if self.k <= 0 || self.k > MAX_K as i64 {
            return Err(ErrorKind::InvalidRequest(format!(
                "k must be in (0, {}], got {}",
                MAX_K, self.k
            )));
        }
        Ok(ValidatedQuery {
            horizon,
            k: self.k as usize,
            query_time: self.query_time,
        })
    }
}

/// A request whose horizon and k passed validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedQuery {
    pub horizon: Horizon,
    pub k: usize,
    pub query_time: DateTime<Utc>,
}

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Real,
    Fallback,
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Per-stage wall time in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub embed: f64,
    pub acquire: f64,
    pub search: f64,
    pub validate: f64,
    pub synthesize: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub method: SearchMethod,
    /// Size of the corpus searched
    pub total_candidates: usize,
    pub k_used: usize,
    pub distance_metric: String,
    pub timings_ms: Timings,
    /// Full ascending distance sequence
    pub distances: Vec<f32>,
    pub degraded: bool,
    /// Attempts made on the real path, including the successful one
    pub attempts: u32,
}

/// Forecast returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub correlation_id: String,
    pub horizon: Horizon,
    pub query_time: DateTime<Utc>,
    pub variables: BTreeMap<String, VariableForecast>,
    pub confidence: f32,
    pub analogs: Vec<AnalogProvenance>,
    pub search_metadata: SearchMetadata,
}

impl ForecastResponse {
    pub fn from_ensemble(
        correlation_id: String,
        query: &ValidatedQuery,
        ensemble: EnsembleResult,
        search_metadata: SearchMetadata,
    ) -> Self {
        Self {
            correlation_id,
            horizon: query.horizon,
            query_time: query.query_time,
            variables: ensemble.variables,
            confidence: ensemble.confidence,
            analogs: ensemble.analogs,
            search_metadata,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.search_metadata.method == SearchMethod::Fallback
    }

    /// Number of analogs behind this forecast
    pub fn neighbor_count(&self) -> usize {
        self.search_metadata.distances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_horizon_conversion() {
        assert_eq!(Horizon::try_from(24).unwrap(), Horizon::H24);
        assert_eq!(Horizon::H48.hours(), 48);
        assert_eq!(Horizon::H6.to_string(), "6h");
        assert!(matches!(
            Horizon::try_from(99),
            Err(ErrorKind::InvalidRequest(_))
        ));
        assert!(Horizon::try_from(-6).is_err());
    }

    #[test]
    fn test_horizon_serde_as_hours() {
        assert_eq!(serde_json::to_string(&Horizon::H12).unwrap(), "12");
        let h: Horizon = serde_json::from_str("48").unwrap();
        assert_eq!(h, Horizon::H48);
        assert!(serde_json::from_str::<Horizon>("7").is_err());
    }

    #[test]
    fn test_query_validation() {
        let ok = QueryRequest::new(24, 10, now()).validate().unwrap();
        assert_eq!(ok.horizon, Horizon::H24);
        assert_eq!(ok.k, 10);

        assert!(QueryRequest::new(24, 200, now()).validate().is_ok());
        for k in [0, -1, 201] {
            let err = QueryRequest::new(24, k, now()).validate().unwrap_err();
            assert_eq!(err.code(), "invalid_request");
        }
        let err = QueryRequest::new(99, 10, now()).validate().unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_request_json_shape() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"horizon": 99, "k": 10, "queryTime": "2024-01-15T12:00:00Z", "correlationId": "abc"}"#,
        )
        .unwrap();
        assert_eq!(req.horizon, 99);
        assert_eq!(req.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_search_method_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SearchMethod::Fallback).unwrap(),
            "\"fallback\""
        );
        assert_eq!(SearchMethod::Real.to_string(), "real");
    }
}
