//! Mapping of aggregation failures to HTTP responses.

use crate::error::AggregationError;
use crate::schema::{AllowedRange, ValidationError};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque message returned for server-side failures.
const INTERNAL_MESSAGE: &str = "the prediction service failed to score this batch";

/// Failures of a `POST /predict/batch` request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("request body is not valid JSON: {}", .0.body_text())]
    Body(#[from] JsonRejection),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("prediction worker failed: {0}")]
    Worker(String),
}

/// JSON error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<SampleDetail>>,
}

/// Violations of one rejected sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDetail {
    pub index: usize,
    pub violations: Vec<ViolationDetail>,
}

/// One violated constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationDetail {
    pub field: String,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_range: Option<AllowedRange>,
}

impl From<&ValidationError> for ViolationDetail {
    fn from(error: &ValidationError) -> Self {
        let allowed_range = match error {
            ValidationError::OutOfRange { range, .. } => Some(*range),
            _ => None,
        };
        Self {
            field: error.field().to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            allowed_range,
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Aggregation(AggregationError::EmptyBatch)
            | ApiError::Aggregation(AggregationError::BatchTooLarge { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Aggregation(AggregationError::BatchValidation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Aggregation(AggregationError::Classification(_)) | ApiError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Body(rejection) => rejection.status(),
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether the failure was caused by the request itself.
    pub fn is_caller_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Build the payload. Internal causes are only included when `expose_internal` is set.
    pub fn body(&self, expose_internal: bool) -> ErrorBody {
        match self {
            ApiError::Aggregation(err) => {
                let details = match err {
                    AggregationError::BatchValidation(rejections) => Some(
                        rejections
                            .iter()
                            .map(|r| SampleDetail {
                                index: r.index,
                                violations: r.violations.iter().map(Into::into).collect(),
                            })
                            .collect(),
                    ),
                    _ => None,
                };
                let message = if err.is_caller_error() || expose_internal {
                    err.to_string()
                } else {
                    INTERNAL_MESSAGE.to_string()
                };
                ErrorBody {
                    error: err.code().to_string(),
                    message,
                    details,
                }
            }
            ApiError::Body(_) | ApiError::InvalidRequest(_) => ErrorBody {
                error: "invalid_request".to_string(),
                message: self.to_string(),
                details: None,
            },
            ApiError::Timeout(_) => ErrorBody {
                error: "timeout".to_string(),
                message: self.to_string(),
                details: None,
            },
            ApiError::Worker(_) => ErrorBody {
                error: "internal_error".to_string(),
                message: if expose_internal {
                    self.to_string()
                } else {
                    INTERNAL_MESSAGE.to_string()
                },
                details: None,
            },
        }
    }

    pub fn respond(&self, expose_internal: bool) -> Response {
        (self.status(), Json(self.body(expose_internal))).into_response()
    }
}
