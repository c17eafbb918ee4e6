//! Analog ensemble forecasting engine
//!
//! Retrieves the historical patterns most similar to a query from a fixed
//! corpus, checks the retrieval, and turns the analogs' recorded outcomes
//! into per-variable weighted-quantile forecasts (median with 5th/95th
//! percentile bounds).

pub mod cache;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod forecast;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod validation;
pub mod web;

pub use config::Settings;
pub use error::{ErrorKind, ForecastError, ForecastResult};
pub use forecast::{ForecastResponse, Horizon, QueryRequest, SearchMethod, MAX_K};
pub use service::{ForecastService, ServiceCell};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
