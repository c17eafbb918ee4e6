//! Ensemble synthesis
//!
//! Analogs retrieved for a query are weighted by similarity and their
//! historical outcomes combined into weighted quantiles per variable.

mod quantile;
mod synthesizer;
mod types;
mod weights;

pub use quantile::{forecast_quantiles, weighted_quantiles, FORECAST_QUANTILES};
pub use synthesizer::EnsembleSynthesizer;
pub use types::{AnalogProvenance, EnsembleResult, VariableForecast};
pub use weights::{concentration, entropy, softmax_weights};
