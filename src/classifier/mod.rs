//! Classifier collaborators.
//!
//! The aggregator only sees the [`Classifier`] trait: an ordered feature
//! matrix goes in, one label per row comes out. The concrete model is loaded
//! once at start-up and shared read-only between requests.

pub mod encoder;
pub mod forest;

pub use encoder::LabelEncoder;
pub use forest::{ForestClassifier, ModelArtifact};

use crate::models::PredictionLabel;
use thiserror::Error;

/// Failures raised by the scoring resource.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("row {row} has {found} features, model expects {expected}")]
    FeatureCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("model produced class index {index} but only {classes} classes are known")]
    UnknownClass { index: usize, classes: usize },

    #[error("model returned {found} predictions for {expected} samples")]
    PredictionCount { expected: usize, found: usize },

    #[error("sample {row} does not carry every feature of the schema")]
    IncompleteSample { row: usize },
}

/// A pre-trained model that labels rows of features.
pub trait Classifier: Send + Sync {
    /// Feature names in the order the model was trained on.
    fn feature_names(&self) -> &[String];

    /// Known output labels.
    fn classes(&self) -> &[PredictionLabel];

    /// Label every row. Rows must follow [`Classifier::feature_names`] order.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<PredictionLabel>, ClassifierError>;
}
