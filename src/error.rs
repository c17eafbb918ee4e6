//! Error taxonomy for the forecasting pipeline
//!
//! Every failure that can end a request is an [`ErrorKind`]; the request's
//! correlation id travels with it inside [`ForecastError`]. Only
//! [`ErrorKind::code`] is meant to leave the service.

use crate::engine::SearchError;
use crate::pool::PoolError;
use crate::validation::ValidationReason;
use thiserror::Error;

/// Failure classes of a forecast request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ErrorKind {
    /// Bad horizon or k; never retried, nothing acquired
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No worker became free before the acquire deadline
    #[error("worker pool exhausted")]
    PoolExhausted,

    /// Query vector does not have the index's dimension
    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index missing or broken for the requested horizon
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    /// Retrieval broke a structural or numerical invariant
    #[error("retrieval failed validation: {0}")]
    ValidationFailed(ValidationReason),

    /// One output variable could not be synthesized
    #[error("synthesis failed for {variable}: {reason}")]
    SynthesisFailed { variable: String, reason: String },

    /// Retries and fallback exhausted, or fallback disabled
    #[error("service unavailable")]
    ServiceUnavailable,
}

impl ErrorKind {
    /// Coarse reason code exposed across the service boundary
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::PoolExhausted => "pool_exhausted",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::SearchUnavailable(_) => "search_unavailable",
            Self::ValidationFailed(_) => "validation_failed",
            Self::SynthesisFailed { .. } => "synthesis_failed",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Whether the orchestrator may retry after this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted | Self::SearchUnavailable(_) | Self::ValidationFailed(_) => true,
            Self::InvalidRequest(_)
            | Self::DimensionMismatch { .. }
            | Self::SynthesisFailed { .. }
            | Self::ServiceUnavailable => false,
        }
    }

    /// Attach a correlation id
    pub fn with_correlation(self, correlation_id: impl Into<String>) -> ForecastError {
        ForecastError {
            correlation_id: correlation_id.into(),
            kind: self,
        }
    }
}

impl From<PoolError> for ErrorKind {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => Self::PoolExhausted,
            PoolError::Unavailable | PoolError::NotReady(_) | PoolError::Closed => {
                Self::ServiceUnavailable
            }
        }
    }
}

impl From<SearchError> for ErrorKind {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            SearchError::Unavailable(reason) => Self::SearchUnavailable(reason),
        }
    }
}

/// A request-level failure tagged with its correlation id
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} [correlation_id={correlation_id}]")]
pub struct ForecastError {
    pub correlation_id: String,
    pub kind: ErrorKind,
}

impl ForecastError {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;
