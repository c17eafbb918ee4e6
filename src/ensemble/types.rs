//! Ensemble output types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Probabilistic forecast for one output variable.
///
/// When `available` is false no number is emitted: the quantile fields are
/// `None` and `reason` names why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableForecast {
    pub median: Option<f32>,
    pub p05: Option<f32>,
    pub p95: Option<f32>,
    /// `p95 - p05`
    pub confidence_width: Option<f32>,
    pub available: bool,
    /// Analogs with a usable value for this variable
    pub neighbor_count: usize,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VariableForecast {
    pub fn available(p05: f32, median: f32, p95: f32, neighbor_count: usize, unit: &str) -> Self {
        Self {
            median: Some(median),
            p05: Some(p05),
            p95: Some(p95),
            confidence_width: Some(p95 - p05),
            available: true,
            neighbor_count,
            unit: unit.to_string(),
            reason: None,
        }
    }

    pub fn unavailable(neighbor_count: usize, unit: &str, reason: impl Into<String>) -> Self {
        Self {
            median: None,
            p05: None,
            p95: None,
            confidence_width: None,
            available: false,
            neighbor_count,
            unit: unit.to_string(),
            reason: Some(reason.into()),
        }
    }
}

/// One contributing analog, for auditability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogProvenance {
    pub index: usize,
    pub weight: f32,
    pub distance: f32,
    /// When the analog was observed
    pub timestamp: DateTime<Utc>,
}

/// Synthesized forecast for every configured variable
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    pub variables: BTreeMap<String, VariableForecast>,
    /// Top analogs by weight
    pub analogs: Vec<AnalogProvenance>,
    /// Bounded `[0, 1]` blend of similarity and weight concentration
    pub confidence: f32,
    /// Ascending distances of all analogs used
    pub distances: Vec<f32>,
    pub neighbor_count: usize,
}

impl EnsembleResult {
    pub fn unavailable_variables(&self) -> impl Iterator<Item = (&String, &VariableForecast)> {
        self.variables.iter().filter(|(_, v)| !v.available)
    }
}
