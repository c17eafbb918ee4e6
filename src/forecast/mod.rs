//! Forecast orchestration and request/response models

mod executor;
mod fallback;
mod models;

pub use executor::{Orchestrator, Stage, DISTANCE_METRIC};
pub use fallback::FallbackPlanner;
pub use models::{
    ForecastResponse, Horizon, QueryRequest, SearchMetadata, SearchMethod, Timings,
    ValidatedQuery, MAX_K,
};
