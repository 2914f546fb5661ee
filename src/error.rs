//! Error kinds raised by batch aggregation.

use crate::classifier::ClassifierError;
use crate::schema::ValidationError;
use serde::Serialize;
use thiserror::Error;

/// Every violation found in one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRejection {
    /// Zero-based position of the sample in the batch.
    pub index: usize,
    pub violations: Vec<ValidationError>,
}

/// Why a batch could not be turned into a recommendation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("batch is empty; submit at least one sample")]
    EmptyBatch,

    #[error("batch has {size} samples; at most {max} are allowed")]
    BatchTooLarge { size: usize, max: usize },

    #[error("{} of the submitted samples failed validation", .0.len())]
    BatchValidation(Vec<SampleRejection>),

    #[error("classification failed: {0}")]
    Classification(#[from] ClassifierError),
}

impl AggregationError {
    /// Whether the caller can fix the request and retry.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, AggregationError::Classification(_))
    }

    /// Stable code used in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AggregationError::EmptyBatch => "empty_batch",
            AggregationError::BatchTooLarge { .. } => "batch_too_large",
            AggregationError::BatchValidation(_) => "validation_failed",
            AggregationError::Classification(_) => "classification_failed",
        }
    }
}
