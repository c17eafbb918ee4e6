//! Application state shared across handlers

use crate::service::ForecastService;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ForecastService>,
}

impl AppState {
    pub fn new(service: Arc<ForecastService>) -> Self {
        Self { service }
    }

    /// Get instance name
    pub fn instance_name(&self) -> &str {
        &self.service.settings().general.instance_name
    }
}
