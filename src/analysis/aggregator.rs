//! Batch aggregation: validation, one classifier call, majority vote.
//!
//! [`BatchAggregator::aggregate`] is the only entry point. It validates the
//! batch shape and every sample, lays the samples out in schema order, asks
//! the classifier for all predictions in a single call and turns the votes
//! into an [`AggregationResult`].

use crate::classifier::{Classifier, ClassifierError};
use crate::error::{AggregationError, SampleRejection};
use crate::models::{
    round_to, AggregationResult, Batch, PredictionLabel, RawSample, VoteTally,
    CONFIDENCE_PRECISION, MAX_BATCH_SIZE,
};
use crate::schema::FeatureSchema;
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns batches of raw samples into majority-vote recommendations.
///
/// Holds no per-request state; one instance is shared by every caller.
pub struct BatchAggregator {
    schema: FeatureSchema,
    classifier: Arc<dyn Classifier>,
}

impl BatchAggregator {
    /// Pair a schema with an already loaded classifier.
    ///
    /// Fails if the schema is malformed or its field order differs from the
    /// order the classifier was trained on.
    pub fn new(schema: FeatureSchema, classifier: Arc<dyn Classifier>) -> Result<Self> {
        schema.check()?;

        let schema_fields = schema.field_names();
        if schema_fields.as_slice() != classifier.feature_names() {
            bail!(
                "Feature schema {} orders fields as [{}] but the model expects [{}]",
                schema.version,
                schema_fields.join(", "),
                classifier.feature_names().join(", ")
            );
        }

        Ok(Self { schema, classifier })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    /// Validate, classify and tally one batch.
    pub fn aggregate(&self, samples: &[RawSample]) -> Result<AggregationResult, AggregationError> {
        let batch = self.validate_batch(samples)?;
        let predictions = self.classify(&batch)?;
        let tally = tally(&predictions);

        let (winner, votes) = match pick_winner(&tally) {
            Some((label, votes)) => (label.to_string(), votes),
            None => {
                return Err(AggregationError::Classification(
                    ClassifierError::PredictionCount {
                        expected: batch.len(),
                        found: 0,
                    },
                ))
            }
        };

        let sample_count = batch.len();
        let confidence = round_to(votes as f64 / sample_count as f64, CONFIDENCE_PRECISION);

        info!(
            "Recommended {} ({}/{} votes, confidence {})",
            winner, votes, sample_count, confidence
        );

        Ok(AggregationResult {
            winner,
            confidence,
            per_sample_predictions: predictions,
            tally,
            sample_count,
            schema_version: self.schema.version.clone(),
            features_order: self.schema.field_names(),
        })
    }

    /// Check the batch bounds, then validate every sample.
    ///
    /// Reports every invalid sample, not just the first one.
    fn validate_batch(&self, samples: &[RawSample]) -> Result<Batch, AggregationError> {
        if samples.is_empty() {
            return Err(AggregationError::EmptyBatch);
        }
        if samples.len() > MAX_BATCH_SIZE {
            return Err(AggregationError::BatchTooLarge {
                size: samples.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        let mut vectors = Vec::with_capacity(samples.len());
        let mut rejections = Vec::new();

        for (index, sample) in samples.iter().enumerate() {
            match self.schema.validate_sample(sample) {
                Ok(vector) => vectors.push(vector),
                Err(violations) => rejections.push(SampleRejection { index, violations }),
            }
        }

        if !rejections.is_empty() {
            warn!(
                "Rejected batch: {} of {} samples invalid",
                rejections.len(),
                samples.len()
            );
            return Err(AggregationError::BatchValidation(rejections));
        }

        debug!("Validated batch of {} samples", vectors.len());
        Ok(Batch::new(vectors))
    }

    /// One classifier call for the whole batch, rows in schema order.
    fn classify(&self, batch: &Batch) -> Result<Vec<PredictionLabel>, AggregationError> {
        let rows = batch
            .samples()
            .iter()
            .enumerate()
            .map(|(row, vector)| {
                self.schema
                    .project(vector)
                    .ok_or(ClassifierError::IncompleteSample { row })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let predictions = self.classifier.predict(&rows)?;

        if predictions.len() != batch.len() {
            return Err(ClassifierError::PredictionCount {
                expected: batch.len(),
                found: predictions.len(),
            }
            .into());
        }

        Ok(predictions)
    }
}

/// Count votes per label, keeping first-seen order.
pub fn tally(predictions: &[PredictionLabel]) -> VoteTally {
    let mut tally = VoteTally::default();
    for label in predictions {
        tally.record(label);
    }
    tally
}

/// Label with the most votes.
///
/// Among labels sharing the top count, the one that appeared first in the
/// batch wins.
pub fn pick_winner(tally: &VoteTally) -> Option<(&str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in tally.iter() {
        match best {
            Some((_, top)) if count <= top => {}
            _ => best = Some((label, count)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted labels and records what it was asked to score.
    struct ScriptedClassifier {
        features: Vec<String>,
        classes: Vec<String>,
        labels: Vec<String>,
        calls: AtomicUsize,
        seen_rows: Mutex<Vec<Vec<f64>>>,
        fail: Option<ClassifierError>,
    }

    impl ScriptedClassifier {
        fn new(labels: &[&str]) -> Self {
            Self {
                features: FeatureSchema::canonical().field_names(),
                classes: vec!["maize".into(), "rice".into()],
                labels: labels.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                seen_rows: Mutex::new(Vec::new()),
                fail: None,
            }
        }

        fn failing(error: ClassifierError) -> Self {
            Self {
                fail: Some(error),
                ..Self::new(&[])
            }
        }
    }

    impl Classifier for ScriptedClassifier {
        fn feature_names(&self) -> &[String] {
            &self.features
        }

        fn classes(&self) -> &[PredictionLabel] {
            &self.classes
        }

        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<PredictionLabel>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_rows.lock().unwrap().extend(rows.iter().cloned());
            match &self.fail {
                Some(err) => Err(err.clone()),
                None => Ok(self.labels.clone()),
            }
        }
    }

    fn sample() -> RawSample {
        json!({"N": 90, "P": 42, "K": 43, "ph": 6.5, "humidity": 82, "temperature": 20})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn samples(n: usize) -> Vec<RawSample> {
        (0..n).map(|_| sample()).collect()
    }

    fn aggregator(classifier: Arc<ScriptedClassifier>) -> BatchAggregator {
        BatchAggregator::new(FeatureSchema::canonical(), classifier).unwrap()
    }

    #[test]
    fn test_unanimous_batch() {
        let classifier = Arc::new(ScriptedClassifier::new(&["maize"; 5]));
        let result = aggregator(classifier.clone()).aggregate(&samples(5)).unwrap();

        assert_eq!(result.winner, "maize");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.sample_count, 5);
        assert_eq!(result.per_sample_predictions.len(), 5);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_six_four_split() {
        let script = [
            "maize", "rice", "rice", "maize", "rice", "rice", "maize", "rice", "rice", "maize",
        ];
        let classifier = Arc::new(ScriptedClassifier::new(&script));
        let result = aggregator(classifier).aggregate(&samples(10)).unwrap();

        assert_eq!(result.winner, "rice");
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.tally.get("rice"), 6);
        assert_eq!(result.tally.get("maize"), 4);
    }

    #[test]
    fn test_tie_goes_to_first_seen_label() {
        let result = aggregator(Arc::new(ScriptedClassifier::new(&["A", "B", "A", "B"])))
            .aggregate(&samples(4))
            .unwrap();
        assert_eq!(result.winner, "A");
        assert_eq!(result.confidence, 0.5);

        let result = aggregator(Arc::new(ScriptedClassifier::new(&["B", "A", "B", "A"])))
            .aggregate(&samples(4))
            .unwrap();
        assert_eq!(result.winner, "B");
    }

    #[test]
    fn test_repeated_calls_agree() {
        let agg = aggregator(Arc::new(ScriptedClassifier::new(&["x", "y", "z"])));
        let first = agg.aggregate(&samples(3)).unwrap();
        for _ in 0..5 {
            assert_eq!(agg.aggregate(&samples(3)).unwrap(), first);
        }
        assert_eq!(first.winner, "x");
        assert_eq!(first.confidence, 0.333);
    }

    #[test]
    fn test_winner_has_max_count_and_tally_sums() {
        let scripts: Vec<Vec<&str>> = vec![
            vec!["a"],
            vec!["a", "b"],
            vec!["c", "a", "b", "a", "c", "c"],
            vec!["a", "b", "c", "d", "e", "f", "g"],
            vec!["q", "q", "r", "r", "r", "s", "s", "s", "s", "q"],
        ];

        for script in scripts {
            let n = script.len();
            let result = aggregator(Arc::new(ScriptedClassifier::new(&script)))
                .aggregate(&samples(n))
                .unwrap();

            let top = result.tally.iter().map(|(_, c)| c).max().unwrap();
            assert_eq!(result.tally.get(&result.winner), top);
            assert_eq!(result.tally.total(), result.sample_count);
            assert_eq!(
                result.confidence,
                round_to(top as f64 / n as f64, CONFIDENCE_PRECISION)
            );
        }
    }

    #[test]
    fn test_empty_batch() {
        let classifier = Arc::new(ScriptedClassifier::new(&[]));
        let err = aggregator(classifier.clone()).aggregate(&[]).unwrap_err();
        assert_eq!(err, AggregationError::EmptyBatch);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_oversized_batch() {
        let classifier = Arc::new(ScriptedClassifier::new(&["maize"; 11]));
        let err = aggregator(classifier.clone())
            .aggregate(&samples(11))
            .unwrap_err();
        assert_eq!(err, AggregationError::BatchTooLarge { size: 11, max: 10 });
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_samples_never_reach_classifier() {
        let classifier = Arc::new(ScriptedClassifier::new(&["maize"; 3]));
        let mut batch = samples(3);
        batch[0].insert("humidity".to_string(), json!(150));
        batch[2].remove("ph");

        let err = aggregator(classifier.clone()).aggregate(&batch).unwrap_err();
        match err {
            AggregationError::BatchValidation(rejections) => {
                assert_eq!(rejections.len(), 2);
                assert_eq!(rejections[0].index, 0);
                assert_eq!(rejections[0].violations[0].field(), "humidity");
                assert_eq!(rejections[1].index, 2);
                assert_eq!(rejections[1].violations[0].field(), "ph");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rows_follow_schema_order() {
        let classifier = Arc::new(ScriptedClassifier::new(&["maize", "maize"]));
        let reordered = json!({"ph": 6.0, "N": 90, "K": 40, "P": 41, "humidity": 80, "temperature": 20})
            .as_object()
            .cloned()
            .unwrap();
        let canonical = json!({"N": 90, "P": 41, "K": 40, "temperature": 20, "humidity": 80, "ph": 6.0})
            .as_object()
            .cloned()
            .unwrap();

        aggregator(classifier.clone())
            .aggregate(&[reordered, canonical])
            .unwrap();

        let rows = classifier.seen_rows.lock().unwrap();
        assert_eq!(rows[0], vec![90.0, 41.0, 40.0, 6.0, 80.0, 20.0]);
        assert_eq!(rows[0], rows[1]);
    }

    #[test]
    fn test_classifier_failure_aborts_batch() {
        let classifier = Arc::new(ScriptedClassifier::failing(
            ClassifierError::UnknownClass {
                index: 7,
                classes: 2,
            },
        ));
        let err = aggregator(classifier.clone())
            .aggregate(&samples(2))
            .unwrap_err();
        assert!(matches!(err, AggregationError::Classification(_)));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wrong_prediction_count() {
        let classifier = Arc::new(ScriptedClassifier::new(&["maize"]));
        let err = aggregator(classifier).aggregate(&samples(3)).unwrap_err();
        assert_eq!(
            err,
            AggregationError::Classification(ClassifierError::PredictionCount {
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn test_schema_must_match_model_order() {
        let mut schema = FeatureSchema::canonical();
        schema.fields.swap(0, 1);
        let result = BatchAggregator::new(schema, Arc::new(ScriptedClassifier::new(&[])));
        assert!(result.is_err());
    }

    #[test]
    fn test_pick_winner() {
        let t = tally(&["b".to_string(), "a".to_string(), "a".to_string()]);
        assert_eq!(pick_winner(&t), Some(("a", 2)));
        assert_eq!(pick_winner(&VoteTally::default()), None);
    }
}
