//! Random-forest classifier loaded from a JSON model artifact.
//!
//! The artifact is produced offline by the training pipeline and carries the
//! feature order, the label encoder and every tree of the forest:
//!
//! ```json
//! {
//!   "version": "2024.1",
//!   "feature_names": ["N", "P", "K", "ph", "humidity", "temperature"],
//!   "classes": ["maize", "rice"],
//!   "trees": [
//!     { "type": "node", "feature_idx": 4, "threshold": 75.0,
//!       "left":  { "type": "leaf", "class_idx": 0 },
//!       "right": { "type": "leaf", "class_idx": 1 } }
//!   ]
//! }
//! ```

use super::{Classifier, ClassifierError, LabelEncoder};
use crate::models::PredictionLabel;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// A node of a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// Split: rows with `x[feature_idx] <= threshold` go left.
    Node {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    /// Terminal class prediction.
    Leaf { class_idx: usize },
}

impl TreeNode {
    fn predict_one(&self, row: &[f64]) -> usize {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { class_idx } => return *class_idx,
                TreeNode::Node {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }

    /// Walk the tree and make sure every index stays within bounds.
    fn check(&self, n_features: usize, n_classes: usize) -> Result<()> {
        match self {
            TreeNode::Leaf { class_idx } => {
                if *class_idx >= n_classes {
                    bail!("leaf class {} out of {} classes", class_idx, n_classes);
                }
                Ok(())
            }
            TreeNode::Node {
                feature_idx,
                left,
                right,
                ..
            } => {
                if *feature_idx >= n_features {
                    bail!("split on feature {} out of {}", feature_idx, n_features);
                }
                left.check(n_features, n_classes)?;
                right.check(n_features, n_classes)
            }
        }
    }

    /// Depth of the tree rooted here (a leaf has depth 0).
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Node { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Persisted model: feature order, label encoder and trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub feature_names: Vec<String>,
    pub classes: LabelEncoder,
    pub trees: Vec<TreeNode>,
}

/// Majority vote over the trees of a forest, decoded to crop labels.
#[derive(Debug, Clone)]
pub struct ForestClassifier {
    artifact: ModelArtifact,
}

impl ForestClassifier {
    /// Load and check an artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model artifact: {}", path.display()))?;

        let artifact: ModelArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse model artifact: {}", path.display()))?;

        let classifier = Self::from_artifact(artifact)
            .with_context(|| format!("Invalid model artifact: {}", path.display()))?;

        info!(
            "Loaded model {} ({} trees, {} classes)",
            classifier.artifact.version,
            classifier.artifact.trees.len(),
            classifier.artifact.classes.len()
        );

        Ok(classifier)
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        if artifact.feature_names.is_empty() {
            bail!("model declares no features");
        }
        if artifact.classes.is_empty() {
            bail!("model declares no classes");
        }
        if artifact.trees.is_empty() {
            bail!("model has no trees");
        }

        let n_features = artifact.feature_names.len();
        let n_classes = artifact.classes.len();
        for (i, tree) in artifact.trees.iter().enumerate() {
            tree.check(n_features, n_classes)
                .with_context(|| format!("tree {} is malformed", i))?;
        }

        debug!(
            "Model max tree depth: {}",
            artifact.trees.iter().map(TreeNode::depth).max().unwrap_or(0)
        );

        Ok(Self { artifact })
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    /// Encoded class index for one row. Ties between trees go to the lowest index.
    fn predict_encoded(&self, row: &[f64]) -> usize {
        let mut votes = vec![0usize; self.artifact.classes.len()];
        for tree in &self.artifact.trees {
            votes[tree.predict_one(row)] += 1;
        }

        let mut best = 0;
        for (class, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = class;
            }
        }
        best
    }
}

impl Classifier for ForestClassifier {
    fn feature_names(&self) -> &[String] {
        &self.artifact.feature_names
    }

    fn classes(&self) -> &[PredictionLabel] {
        self.artifact.classes.classes()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<PredictionLabel>, ClassifierError> {
        let expected = self.artifact.feature_names.len();

        let mut encoded = Vec::with_capacity(rows.len());
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != expected {
                return Err(ClassifierError::FeatureCount {
                    row: row_idx,
                    expected,
                    found: row.len(),
                });
            }
            encoded.push(self.predict_encoded(row));
        }

        self.artifact.classes.inverse_transform(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn leaf(class_idx: usize) -> TreeNode {
        TreeNode::Leaf { class_idx }
    }

    fn split(feature_idx: usize, threshold: f64, left: TreeNode, right: TreeNode) -> TreeNode {
        TreeNode::Node {
            feature_idx,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// humidity (idx 4) splits maize/rice; one tree also looks at K.
    fn artifact() -> ModelArtifact {
        ModelArtifact {
            version: "test".to_string(),
            feature_names: ["N", "P", "K", "ph", "humidity", "temperature"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            classes: LabelEncoder::new(vec!["maize".into(), "rice".into(), "cacao".into()]),
            trees: vec![
                split(4, 75.0, leaf(0), leaf(1)),
                split(4, 70.0, leaf(0), leaf(1)),
                split(2, 100.0, split(4, 80.0, leaf(0), leaf(1)), leaf(2)),
            ],
        }
    }

    #[test]
    fn test_majority_over_trees() {
        let model = ForestClassifier::from_artifact(artifact()).unwrap();
        let rows = vec![
            vec![90.0, 40.0, 40.0, 6.5, 60.0, 22.0],
            vec![90.0, 40.0, 40.0, 6.5, 85.0, 22.0],
            vec![90.0, 40.0, 40.0, 6.5, 78.0, 22.0],
        ];
        let labels = model.predict(&rows).unwrap();
        assert_eq!(labels, vec!["maize", "rice", "rice"]);
    }

    #[test]
    fn test_tree_tie_goes_to_lowest_index() {
        let mut art = artifact();
        art.trees = vec![leaf(2), leaf(1)];
        let model = ForestClassifier::from_artifact(art).unwrap();
        let labels = model.predict(&[vec![0.0; 6]]).unwrap();
        assert_eq!(labels, vec!["rice"]);
    }

    #[test]
    fn test_wrong_feature_count() {
        let model = ForestClassifier::from_artifact(artifact()).unwrap();
        let err = model.predict(&[vec![1.0, 2.0]]).unwrap_err();
        assert_eq!(
            err,
            ClassifierError::FeatureCount {
                row: 0,
                expected: 6,
                found: 2
            }
        );
    }

    #[test]
    fn test_rejects_out_of_bounds_indices() {
        let mut art = artifact();
        art.trees.push(leaf(9));
        assert!(ForestClassifier::from_artifact(art).is_err());

        let mut art = artifact();
        art.trees.push(split(6, 1.0, leaf(0), leaf(0)));
        assert!(ForestClassifier::from_artifact(art).is_err());

        let mut art = artifact();
        art.trees.clear();
        assert!(ForestClassifier::from_artifact(art).is_err());
    }

    #[test]
    fn test_tree_depth() {
        let art = artifact();
        assert_eq!(art.trees[0].depth(), 1);
        assert_eq!(art.trees[2].depth(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&artifact()).unwrap().as_bytes())
            .unwrap();

        let model = ForestClassifier::load(file.path()).unwrap();
        assert_eq!(model.version(), "test");
        assert_eq!(model.classes().len(), 3);
        assert_eq!(model.feature_names()[4], "humidity");
    }

    #[test]
    fn test_artifact_json_format() {
        let json = r#"{
            "version": "v",
            "feature_names": ["a"],
            "classes": ["x", "y"],
            "trees": [
                { "type": "node", "feature_idx": 0, "threshold": 1.5,
                  "left": { "type": "leaf", "class_idx": 0 },
                  "right": { "type": "leaf", "class_idx": 1 } }
            ]
        }"#;
        let art: ModelArtifact = serde_json::from_str(json).unwrap();
        let model = ForestClassifier::from_artifact(art).unwrap();
        assert_eq!(model.predict(&[vec![1.0], vec![2.0]]).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ForestClassifier::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read model artifact"));
    }
}
