//! HTTP request handlers

use super::state::AppState;
use crate::error::{ErrorKind, ForecastError};
use crate::forecast::{ForecastResponse, QueryRequest};
use crate::metrics::{HealthSnapshot, HealthStatus};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Error body: a coarse code and the correlation id, nothing internal
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn status_for(kind: &ErrorKind) -> StatusCode {
        match kind {
            ErrorKind::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ErrorKind::DimensionMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::PoolExhausted
            | ErrorKind::SearchUnavailable(_)
            | ErrorKind::ValidationFailed(_)
            | ErrorKind::SynthesisFailed { .. }
            | ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        let detail = match &err.kind {
            ErrorKind::InvalidRequest(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            status: Self::status_for(&err.kind),
            body: ErrorBody {
                code: err.code(),
                correlation_id: err.correlation_id,
                detail,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                code: "invalid_request",
                correlation_id: Uuid::new_v4().to_string(),
                detail: Some(rejection.body_text()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Service identification
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.instance_name(),
        "version": crate::VERSION,
        "horizons": state.service.horizons(),
    }))
}

/// Forecast handler
pub async fn forecast(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ForecastResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state.service.forecast(request).await?;
    Ok(Json(response))
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.service.health();
    let status = match snapshot.status {
        HealthStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(snapshot))
}
