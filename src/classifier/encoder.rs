//! Mapping between encoded class indices and crop labels.

use super::ClassifierError;
use crate::models::PredictionLabel;
use serde::{Deserialize, Serialize};

/// Label encoder persisted alongside the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelEncoder {
    classes: Vec<PredictionLabel>,
}

impl LabelEncoder {
    #[cfg(test)]
    pub fn new(classes: Vec<PredictionLabel>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[PredictionLabel] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Map encoded indices back to labels.
    pub fn inverse_transform(
        &self,
        encoded: &[usize],
    ) -> Result<Vec<PredictionLabel>, ClassifierError> {
        encoded
            .iter()
            .map(|&index| {
                self.classes
                    .get(index)
                    .cloned()
                    .ok_or(ClassifierError::UnknownClass {
                        index,
                        classes: self.classes.len(),
                    })
            })
            .collect()
    }
}
