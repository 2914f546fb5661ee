//! Feature schema and sample validation.
//!
//! The schema is the single, versioned description of which fields a sample
//! carries, which physical range each one may take, and the order the
//! classifier was trained on. Validation and classification both read it.

use crate::models::{FeatureVector, RawSample};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Allowed interval for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllowedRange {
    pub min: f64,
    pub max: f64,
    /// Whether both bounds are part of the range.
    pub inclusive: bool,
}

impl AllowedRange {
    pub fn contains(&self, value: f64) -> bool {
        if self.inclusive {
            value >= self.min && value <= self.max
        } else {
            value > self.min && value < self.max
        }
    }
}

impl fmt::Display for AllowedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inclusive {
            write!(f, "[{}, {}]", self.min, self.max)
        } else {
            write!(f, "({}, {})", self.min, self.max)
        }
    }
}

/// One named field of the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            inclusive: true,
        }
    }

    pub fn range(&self) -> AllowedRange {
        AllowedRange {
            min: self.min,
            max: self.max,
            inclusive: self.inclusive,
        }
    }
}

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("field '{field}' is missing")]
    Missing { field: String },

    #[error("field '{field}' must be a finite number, got {found}")]
    NotNumeric { field: String, found: String },

    #[error("field '{field}' = {value} is outside the allowed range {range}")]
    OutOfRange {
        field: String,
        value: f64,
        range: AllowedRange,
    },

    #[error("field '{field}' is not part of the feature schema")]
    UnknownField { field: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Missing { field }
            | ValidationError::NotNumeric { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::UnknownField { field } => field,
        }
    }

    /// Short machine-readable code for the violation.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Missing { .. } => "missing",
            ValidationError::NotNumeric { .. } => "not_numeric",
            ValidationError::OutOfRange { .. } => "out_of_range",
            ValidationError::UnknownField { .. } => "unknown_field",
        }
    }
}

/// Named, ordered, versioned list of features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: String,
    pub fields: Vec<FieldSpec>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::canonical()
    }
}

impl FeatureSchema {
    /// Schema `v1`: the six soil/climate measurements in model order.
    pub fn canonical() -> Self {
        Self {
            version: "v1".to_string(),
            fields: vec![
                FieldSpec::new("N", 0.0, 200.0),
                FieldSpec::new("P", 0.0, 200.0),
                FieldSpec::new("K", 0.0, 200.0),
                FieldSpec::new("ph", 0.0, 14.0),
                FieldSpec::new("humidity", 0.0, 100.0),
                FieldSpec::new("temperature", -50.0, 60.0),
            ],
        }
    }

    /// Field names in classifier order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Reject schemas that cannot validate anything sensibly.
    pub fn check(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            bail!("Feature schema version must not be empty");
        }
        if self.fields.is_empty() {
            bail!("Feature schema must declare at least one field");
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                bail!("Feature schema declares '{}' twice", field.name);
            }
            if !field.min.is_finite() || !field.max.is_finite() {
                bail!("Range bounds for '{}' must be finite", field.name);
            }
            if field.min > field.max {
                bail!(
                    "Range for '{}' has min {} greater than max {}",
                    field.name,
                    field.min,
                    field.max
                );
            }
        }

        Ok(())
    }

    /// Validate one raw sample into a [`FeatureVector`].
    ///
    /// Accept or reject only; values are never clamped or coerced. Every
    /// violation in the sample is returned, schema fields first.
    pub fn validate_sample(
        &self,
        sample: &RawSample,
    ) -> std::result::Result<FeatureVector, Vec<ValidationError>> {
        let mut values = BTreeMap::new();
        let mut violations = Vec::new();

        for spec in &self.fields {
            match sample.get(&spec.name) {
                None | Some(Value::Null) => violations.push(ValidationError::Missing {
                    field: spec.name.clone(),
                }),
                Some(value) => match value.as_f64().filter(|v| v.is_finite()) {
                    Some(number) if spec.range().contains(number) => {
                        values.insert(spec.name.clone(), number);
                    }
                    Some(number) => violations.push(ValidationError::OutOfRange {
                        field: spec.name.clone(),
                        value: number,
                        range: spec.range(),
                    }),
                    None => violations.push(ValidationError::NotNumeric {
                        field: spec.name.clone(),
                        found: describe_json(value),
                    }),
                },
            }
        }

        let mut unknown: Vec<&String> = sample
            .keys()
            .filter(|key| !self.fields.iter().any(|f| &f.name == *key))
            .collect();
        unknown.sort();
        violations.extend(unknown.into_iter().map(|key| ValidationError::UnknownField {
            field: key.clone(),
        }));

        if violations.is_empty() {
            Ok(FeatureVector::from_validated(values))
        } else {
            Err(violations)
        }
    }

    /// Lay a validated vector out in schema order.
    ///
    /// Returns `None` if the vector lacks a schema field, which only happens
    /// when it was validated against a different schema.
    pub fn project(&self, vector: &FeatureVector) -> Option<Vec<f64>> {
        self.fields.iter().map(|f| vector.get(&f.name)).collect()
    }
}

fn describe_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(value: Value) -> RawSample {
        value.as_object().cloned().unwrap()
    }

    fn valid() -> RawSample {
        sample(json!({
            "N": 90, "P": 42, "K": 43, "ph": 6.5, "humidity": 82, "temperature": 20.5
        }))
    }

    #[test]
    fn test_canonical_order() {
        let schema = FeatureSchema::canonical();
        assert_eq!(
            schema.field_names(),
            vec!["N", "P", "K", "ph", "humidity", "temperature"]
        );
        assert!(schema.check().is_ok());
    }

    #[test]
    fn test_valid_sample() {
        let schema = FeatureSchema::canonical();
        let vector = schema.validate_sample(&valid()).unwrap();
        assert_eq!(vector.get("ph"), Some(6.5));
        assert_eq!(
            schema.project(&vector).unwrap(),
            vec![90.0, 42.0, 43.0, 6.5, 82.0, 20.5]
        );
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let schema = FeatureSchema::canonical();
        let a = sample(json!({
            "ph": 6.0, "N": 90, "K": 40, "P": 40, "humidity": 80, "temperature": 20
        }));
        let b = sample(json!({
            "N": 90, "P": 40, "K": 40, "temperature": 20, "humidity": 80, "ph": 6.0
        }));

        let va = schema.validate_sample(&a).unwrap();
        let vb = schema.validate_sample(&b).unwrap();
        assert_eq!(schema.project(&va), schema.project(&vb));
        assert_eq!(
            schema.project(&va).unwrap(),
            vec![90.0, 40.0, 40.0, 6.0, 80.0, 20.0]
        );
    }

    #[test]
    fn test_humidity_out_of_range() {
        let schema = FeatureSchema::canonical();
        let mut raw = valid();
        raw.insert("humidity".to_string(), json!(150));

        let errors = schema.validate_sample(&raw).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ValidationError::OutOfRange {
                field: "humidity".to_string(),
                value: 150.0,
                range: AllowedRange {
                    min: 0.0,
                    max: 100.0,
                    inclusive: true
                },
            }
        );
        assert_eq!(errors[0].field(), "humidity");
    }

    #[test]
    fn test_bounds_are_inclusive_by_default() {
        let schema = FeatureSchema::canonical();
        let mut raw = valid();
        raw.insert("humidity".to_string(), json!(100));
        raw.insert("ph".to_string(), json!(0));
        assert!(schema.validate_sample(&raw).is_ok());
    }

    #[test]
    fn test_exclusive_bounds() {
        let range = AllowedRange {
            min: 0.0,
            max: 14.0,
            inclusive: false,
        };
        assert!(!range.contains(0.0));
        assert!(!range.contains(14.0));
        assert!(range.contains(7.0));
        assert_eq!(range.to_string(), "(0, 14)");
    }

    #[test]
    fn test_collects_every_violation() {
        let schema = FeatureSchema::canonical();
        let raw = sample(json!({
            "N": "90", "P": null, "ph": 6.5, "humidity": 82, "temperature": 99, "rainfall": 200
        }));

        let errors = schema.validate_sample(&raw).unwrap_err();
        let kinds: Vec<(&str, &str)> = errors.iter().map(|e| (e.field(), e.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                ("N", "not_numeric"),
                ("P", "missing"),
                ("K", "missing"),
                ("temperature", "out_of_range"),
                ("rainfall", "unknown_field"),
            ]
        );
    }

    #[test]
    fn test_booleans_are_not_numbers() {
        let schema = FeatureSchema::canonical();
        let mut raw = valid();
        raw.insert("K".to_string(), json!(true));
        let errors = schema.validate_sample(&raw).unwrap_err();
        assert_eq!(
            errors[0],
            ValidationError::NotNumeric {
                field: "K".to_string(),
                found: "boolean true".to_string(),
            }
        );
    }

    #[test]
    fn test_check_rejects_bad_schemas() {
        let mut schema = FeatureSchema::canonical();
        schema.fields.push(FieldSpec::new("N", 0.0, 1.0));
        assert!(schema.check().is_err());

        let inverted = FeatureSchema {
            version: "v2".to_string(),
            fields: vec![FieldSpec::new("ph", 14.0, 0.0)],
        };
        assert!(inverted.check().is_err());

        let empty = FeatureSchema {
            version: "v0".to_string(),
            fields: vec![],
        };
        assert!(empty.check().is_err());
    }

    #[test]
    fn test_project_with_foreign_vector() {
        let schema = FeatureSchema::canonical();
        let vector = schema.validate_sample(&valid()).unwrap();
        let other = FeatureSchema {
            version: "v2".to_string(),
            fields: vec![FieldSpec::new("rainfall", 0.0, 5000.0)],
        };
        assert!(other.project(&vector).is_none());
    }

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let error = ValidationError::Missing {
            field: "N".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["kind"], "missing");
        assert_eq!(value["field"], "N");
    }
}
