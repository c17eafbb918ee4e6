//! Turns a validated retrieval into per-variable quantile forecasts

use super::quantile::forecast_quantiles;
use super::types::{AnalogProvenance, EnsembleResult, VariableForecast};
use super::weights::{concentration, softmax_weights};
use crate::config::{SynthesisSettings, VariableRange};
use crate::corpus::HorizonCorpus;
use crate::engine::{cosine_from_distance, Retrieval};
use crate::error::ErrorKind;
use std::collections::BTreeMap;
use tracing::debug;

/// Weighted-quantile ensemble synthesizer
#[derive(Debug, Clone)]
pub struct EnsembleSynthesizer {
    temperature: f64,
    top_n: usize,
    min_valid_floor: usize,
    confidence_blend: f64,
    variables: Vec<VariableRange>,
}

impl Default for EnsembleSynthesizer {
    fn default() -> Self {
        Self::new(&SynthesisSettings::default())
    }
}

/// One analog resolved against the corpus
struct Member {
    row: usize,
    distance: f32,
    similarity: f64,
}

impl EnsembleSynthesizer {
    pub fn new(settings: &SynthesisSettings) -> Self {
        Self {
            temperature: settings.temperature,
            top_n: settings.top_n,
            min_valid_floor: settings.min_valid_floor,
            confidence_blend: settings.confidence_blend,
            variables: settings.variables.clone(),
        }
    }

    /// Valid analogs a variable needs before it is reported
    pub fn min_valid(&self, k: usize) -> usize {
        self.min_valid_floor.max(k / 4)
    }

    pub fn variables(&self) -> &[VariableRange] {
        &self.variables
    }

    /// Synthesize every configured variable from a validated retrieval
    pub fn synthesize(&self, retrieval: &Retrieval, corpus: &HorizonCorpus, k: usize) -> EnsembleResult {
        let members: Vec<Member> = retrieval
            .neighbors
            .indices()
            .zip(&retrieval.distances.distances)
            .filter_map(|(index, &distance)| {
                let row = usize::try_from(index).ok().filter(|&r| r < corpus.len())?;
                Some(Member {
                    row,
                    distance,
                    similarity: cosine_from_distance(distance),
                })
            })
            .collect();

        let similarities: Vec<f64> = members.iter().map(|m| m.similarity).collect();
        let weights = softmax_weights(&similarities, self.temperature);

        let variables: BTreeMap<String, VariableForecast> = self
            .variables
            .iter()
            .map(|var| {
                let forecast = self
                    .synthesize_variable(var, &members, corpus, k)
                    .unwrap_or_else(|err| {
                        debug!("{}", err);
                        let reason = match err {
                            ErrorKind::SynthesisFailed { reason, .. } => reason,
                            other => other.code().to_string(),
                        };
                        let usable = self.usable_count(var, &members, corpus);
                        VariableForecast::unavailable(usable, &var.unit, reason)
                    });
                (var.name.clone(), forecast)
            })
            .collect();

        let analogs = members
            .iter()
            .zip(&weights)
            .take(self.top_n)
            .map(|(m, &w)| AnalogProvenance {
                index: m.row,
                weight: w as f32,
                distance: m.distance,
                timestamp: corpus.timestamps[m.row],
            })
            .collect();

        EnsembleResult {
            variables,
            analogs,
            confidence: self.confidence(&similarities, &weights),
            distances: members.iter().map(|m| m.distance).collect(),
            neighbor_count: members.len(),
        }
    }

    fn usable_count(&self, var: &VariableRange, members: &[Member], corpus: &HorizonCorpus) -> usize {
        match corpus.outcomes.column(&var.name) {
            Some(col) => members
                .iter()
                .filter(|m| {
                    corpus
                        .outcomes
                        .value(m.row, col)
                        .is_some_and(|v| var.accepts(v))
                })
                .count(),
            None => 0,
        }
    }

    fn synthesize_variable(
        &self,
        var: &VariableRange,
        members: &[Member],
        corpus: &HorizonCorpus,
        k: usize,
    ) -> Result<VariableForecast, ErrorKind> {
        let col = corpus
            .outcomes
            .column(&var.name)
            .ok_or_else(|| ErrorKind::SynthesisFailed {
                variable: var.name.clone(),
                reason: "not_in_outcome_table".to_string(),
            })?;

        let (values, similarities): (Vec<f32>, Vec<f64>) = members
            .iter()
            .filter_map(|m| {
                let value = corpus.outcomes.value(m.row, col)?;
                var.accepts(value).then_some((value, m.similarity))
            })
            .unzip();

        let required = self.min_valid(k);
        if values.len() < required {
            return Err(ErrorKind::SynthesisFailed {
                variable: var.name.clone(),
                reason: format!(
                    "insufficient_valid_analogs ({} of {} required)",
                    values.len(),
                    required
                ),
            });
        }

        // Renormalized over the surviving analogs so the weight mass is positive
        let weights = softmax_weights(&similarities, self.temperature);
        let (p05, median, p95) = forecast_quantiles(&values, &weights);

        Ok(VariableForecast::available(
            p05,
            median,
            p95,
            values.len(),
            &var.unit,
        ))
    }

    fn confidence(&self, similarities: &[f64], weights: &[f64]) -> f32 {
        if similarities.is_empty() {
            return 0.0;
        }
        let mean_similarity =
            (similarities.iter().sum::<f64>() / similarities.len() as f64).clamp(0.0, 1.0);
        let blend = self.confidence_blend;
        let score = blend * mean_similarity + (1.0 - blend) * concentration(weights);
        score.clamp(0.0, 1.0) as f32
    }
}
