//! Data models for the crop advisor.
//!
//! This module contains the core data structures shared by the aggregator,
//! the HTTP boundary and the report generator: validated samples, vote
//! tallies, aggregation results and their wire representations.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A crop label produced by the classifier. Compared by exact string match.
pub type PredictionLabel = String;

/// One caller-provided sample before validation (field name -> JSON value).
pub type RawSample = serde_json::Map<String, Value>;

/// Hard upper bound on the number of samples in one batch.
pub const MAX_BATCH_SIZE: usize = 10;

/// Decimal digits kept when reporting confidence.
pub const CONFIDENCE_PRECISION: i32 = 3;

/// A validated sample: every schema field present, numeric and in range.
///
/// Fields are keyed by name; the order handed to the classifier comes from
/// the feature schema, never from the order the caller sent them in.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    /// Only the schema validator builds feature vectors.
    pub(crate) fn from_validated(values: BTreeMap<String, f64>) -> Self {
        Self { values }
    }

    /// Value of a named field.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

/// An ordered batch of validated samples (1 to [`MAX_BATCH_SIZE`]).
#[derive(Debug, Clone)]
pub struct Batch {
    samples: Vec<FeatureVector>,
}

impl Batch {
    pub(crate) fn new(samples: Vec<FeatureVector>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[FeatureVector] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Count of samples per predicted label.
///
/// Entries keep the order in which each label was first seen, which is what
/// the tie-break relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    entries: Vec<(PredictionLabel, usize)>,
}

impl VoteTally {
    /// Count one vote for `label`.
    pub fn record(&mut self, label: &str) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((label.to_string(), 1)),
        }
    }

    /// Votes for a label (0 if it never appeared).
    pub fn get(&self, label: &str) -> usize {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }

    /// Entries sorted by count, highest first. Equal counts keep first-seen order.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut ranked: Vec<(&str, usize)> = self.iter().collect();
        ranked.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        ranked
    }
}

impl Serialize for VoteTally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, count) in &self.entries {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for VoteTally {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TallyVisitor;

        impl<'de> Visitor<'de> for TallyVisitor {
            type Value = VoteTally;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of label to vote count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<VoteTally, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, count)) = access.next_entry::<String, usize>()? {
                    entries.push((label, count));
                }
                Ok(VoteTally { entries })
            }
        }

        deserializer.deserialize_map(TallyVisitor)
    }
}

/// Outcome of aggregating one batch. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    /// Label with the most votes.
    pub winner: PredictionLabel,
    /// Winner votes / sample count, rounded to [`CONFIDENCE_PRECISION`] digits.
    pub confidence: f64,
    /// One prediction per sample, in submission order.
    pub per_sample_predictions: Vec<PredictionLabel>,
    /// Full tally.
    pub tally: VoteTally,
    /// Number of samples in the batch.
    pub sample_count: usize,
    /// Version of the feature schema used.
    pub schema_version: String,
    /// Feature order handed to the classifier.
    pub features_order: Vec<String>,
}

/// Body of `POST /predict/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub samples: Vec<RawSample>,
}

/// Successful response of `POST /predict/batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub recommended_crop: PredictionLabel,
    pub confidence: f64,
    pub total_samples: usize,
    pub all_predictions: Vec<PredictionLabel>,
    pub vote_details: VoteTally,
    pub features_order: Vec<String>,
    pub schema_version: String,
}

impl BatchResponse {
    /// Share of the batch that voted for `label`.
    pub fn vote_share(&self, label: &str) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        self.vote_details.get(label) as f64 / self.total_samples as f64
    }
}

impl From<AggregationResult> for BatchResponse {
    fn from(result: AggregationResult) -> Self {
        Self {
            recommended_crop: result.winner,
            confidence: result.confidence,
            total_samples: result.sample_count,
            all_predictions: result.per_sample_predictions,
            vote_details: result.tally,
            features_order: result.features_order,
            schema_version: result.schema_version,
        }
    }
}

/// Round to a fixed number of decimal digits.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
