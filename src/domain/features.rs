//! Feature extraction for the PTLD classifier.
//!
//! Turns a patient's snapshot and treatment history into the numeric,
//! schema-ordered vector the active classifier version expects.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::patient::{MonitoringVisit, PatientSnapshot, TreatmentModification};

/// Adherence mean used when a patient has no recorded adherence yet.
pub const DEFAULT_ADHERENCE_MEAN: f64 = 90.0;
/// Adherence minimum used when a patient has no recorded adherence yet.
pub const DEFAULT_ADHERENCE_MIN: f64 = 85.0;
/// Adherence standard deviation used when a patient has no recorded adherence yet.
pub const DEFAULT_ADHERENCE_STD: f64 = 5.0;

/// Feature schema of model v1.0.0, in classifier order.
pub const DEFAULT_FEATURE_SCHEMA: [&str; 10] = [
    "age",
    "hiv_positive",
    "diabetes",
    "smoker",
    "comorbidity_count",
    "adherence_mean",
    "adherence_min",
    "adherence_std",
    "modification_count",
    "visit_count",
];

/// Raised when the extracted vector cannot satisfy a classifier's schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing required features: {}", .missing.join(", "))]
pub struct MissingFeatureError {
    /// Schema entries that could not be produced, in schema order
    pub missing: Vec<String>,
}

/// Ordered list of `(feature name, value)` pairs.
///
/// Serialized as a JSON object whose key order matches the schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedValues {
    entries: Vec<(String, f64)>,
}

impl NamedValues {
    /// Build from pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when names and their order equal `schema` exactly.
    #[must_use]
    pub fn matches_schema(&self, schema: &[String]) -> bool {
        self.entries.len() == schema.len()
            && self.entries.iter().zip(schema).all(|((k, _), s)| k == s)
    }
}

impl Serialize for NamedValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NamedValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamedValuesVisitor;

        impl<'de> Visitor<'de> for NamedValuesVisitor {
            type Value = NamedValues;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of feature name to number")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, f64>()? {
                    entries.push((k, v));
                }
                Ok(NamedValues { entries })
            }
        }

        deserializer.deserialize_map(NamedValuesVisitor)
    }
}

/// Schema-ordered numeric input to the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(NamedValues);

impl FeatureVector {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(NamedValues::from_pairs(pairs))
    }

    /// Pair `schema` names with `values` positionally.
    #[must_use]
    pub fn from_schema(schema: &[String], values: &[f64]) -> Self {
        Self(NamedValues::from_pairs(
            schema.iter().cloned().zip(values.iter().copied()),
        ))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.names()
    }

    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.0.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn matches_schema(&self, schema: &[String]) -> bool {
        self.0.matches_schema(schema)
    }
}

/// Statistics over a patient's monitoring visits and modifications.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisitAggregate {
    pub adherence_mean: f64,
    pub adherence_min: f64,
    /// Population standard deviation
    pub adherence_std: f64,
    pub visit_count: usize,
    pub modification_count: usize,
}

impl VisitAggregate {
    /// Aggregate visits with a recorded adherence percentage.
    ///
    /// Falls back to the fixed defaults (90.0 / 85.0 / 5.0) when no visit
    /// carries an adherence value.
    #[must_use]
    pub fn compute(visits: &[MonitoringVisit], modifications: &[TreatmentModification]) -> Self {
        let adherence: Vec<f64> = visits
            .iter()
            .filter_map(|v| v.adherence_pct)
            .filter(|v| v.is_finite())
            .collect();

        let (adherence_mean, adherence_min, adherence_std) = if adherence.is_empty() {
            (
                DEFAULT_ADHERENCE_MEAN,
                DEFAULT_ADHERENCE_MIN,
                DEFAULT_ADHERENCE_STD,
            )
        } else {
            let n = adherence.len() as f64;
            let mean = adherence.iter().sum::<f64>() / n;
            let min = adherence.iter().copied().fold(f64::INFINITY, f64::min);
            let variance = adherence.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            (mean, min, variance.sqrt())
        };

        Self {
            adherence_mean,
            adherence_min,
            adherence_std,
            visit_count: visits.len(),
            modification_count: modifications.len(),
        }
    }
}

/// Builds feature vectors for one classifier schema.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    schema: Vec<String>,
}

impl FeatureExtractor {
    /// Extractor bound to the given ordered feature schema.
    pub fn new<I, S>(schema: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schema: schema.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// Extract the feature vector for one patient.
    ///
    /// # Errors
    /// Returns `MissingFeatureError` listing every schema entry that cannot be
    /// produced from the inputs.
    pub fn extract(
        &self,
        patient: &PatientSnapshot,
        visits: &[MonitoringVisit],
        modifications: &[TreatmentModification],
    ) -> Result<FeatureVector, MissingFeatureError> {
        let aggregate = VisitAggregate::compute(visits, modifications);

        let mut entries = Vec::with_capacity(self.schema.len());
        let mut missing = Vec::new();
        for name in &self.schema {
            match feature_value(name, patient, &aggregate) {
                Some(value) => entries.push((name.clone(), value)),
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(MissingFeatureError { missing });
        }

        Ok(FeatureVector::from_pairs(entries))
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_SCHEMA)
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn is_positive_smear(result: &str) -> bool {
    result.starts_with('+') || result.to_ascii_lowercase().starts_with("pos")
}

fn feature_value(name: &str, patient: &PatientSnapshot, aggregate: &VisitAggregate) -> Option<f64> {
    let c = &patient.comorbidities;
    let value = match name {
        "age" => f64::from(patient.age),
        "hiv_positive" => flag(c.hiv_positive),
        "diabetes" => flag(c.diabetes),
        "smoker" => flag(c.smoker),
        "aids" => flag(c.aids),
        "alcoholism" => flag(c.alcoholism),
        "mental_disorder" => flag(c.mental_disorder),
        "drug_addiction" => flag(c.drug_addiction),
        "comorbidity_count" => f64::from(c.count()),
        "adherence_mean" => aggregate.adherence_mean,
        "adherence_min" => aggregate.adherence_min,
        "adherence_std" => aggregate.adherence_std,
        "modification_count" => aggregate.modification_count as f64,
        "visit_count" => aggregate.visit_count as f64,
        "days_in_treatment" => f64::from(patient.days_in_treatment?),
        "bacilloscopy_positive_months" => (1..=super::patient::BACILLOSCOPY_MONTHS)
            .filter_map(|m| patient.bacilloscopy_month(m))
            .filter(|r| is_positive_smear(r))
            .count() as f64,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patient::{Comorbidities, Sex};

    fn patient() -> PatientSnapshot {
        let mut p = PatientSnapshot::new("PT-00010", Sex::Male, 45);
        p.comorbidities = Comorbidities {
            hiv_positive: true,
            smoker: true,
            ..Default::default()
        };
        p
    }

    #[test]
    fn test_empty_visits_use_exact_defaults() {
        let aggregate = VisitAggregate::compute(&[], &[]);
        assert_eq!(aggregate.adherence_mean, 90.0);
        assert_eq!(aggregate.adherence_min, 85.0);
        assert_eq!(aggregate.adherence_std, 5.0);
        assert_eq!(aggregate.visit_count, 0);
    }

    #[test]
    fn test_visits_without_adherence_use_defaults_but_count() {
        let mut visit = MonitoringVisit::with_adherence("V-001", 0.0);
        visit.adherence_pct = None;
        let aggregate = VisitAggregate::compute(&[visit], &[]);
        assert_eq!(aggregate.adherence_mean, DEFAULT_ADHERENCE_MEAN);
        assert_eq!(aggregate.visit_count, 1);
    }

    #[test]
    fn test_adherence_statistics() {
        let visits = vec![
            MonitoringVisit::with_adherence("V-001", 70.0),
            MonitoringVisit::with_adherence("V-002", 80.0),
            MonitoringVisit::with_adherence("V-003", 90.0),
        ];
        let mods = vec![TreatmentModification::new("M-001", "INH", "hepatotoxicity")];
        let aggregate = VisitAggregate::compute(&visits, &mods);

        assert!((aggregate.adherence_mean - 80.0).abs() < 1e-9);
        assert!((aggregate.adherence_min - 70.0).abs() < 1e-9);
        // population std of {70, 80, 90}
        assert!((aggregate.adherence_std - (200.0_f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(aggregate.visit_count, 3);
        assert_eq!(aggregate.modification_count, 1);
    }

    #[test]
    fn test_extract_follows_schema_order() {
        let extractor = FeatureExtractor::default();
        let vector = extractor.extract(&patient(), &[], &[]).expect("Should extract");

        let names: Vec<&str> = vector.names().collect();
        assert_eq!(names, DEFAULT_FEATURE_SCHEMA.to_vec());
        assert_eq!(vector.get("age"), Some(45.0));
        assert_eq!(vector.get("comorbidity_count"), Some(2.0));
        assert_eq!(vector.get("adherence_mean"), Some(90.0));
        assert_eq!(vector.get("visit_count"), Some(0.0));
    }

    #[test]
    fn test_extract_reports_unknown_features() {
        let extractor = FeatureExtractor::new(["age", "bmi", "x_ray_score"]);
        let err = extractor.extract(&patient(), &[], &[]).unwrap_err();
        assert_eq!(err.missing, vec!["bmi".to_string(), "x_ray_score".to_string()]);
    }

    #[test]
    fn test_days_in_treatment_required_when_requested() {
        let extractor = FeatureExtractor::new(["days_in_treatment"]);
        assert!(extractor.extract(&patient(), &[], &[]).is_err());

        let mut p = patient();
        p.days_in_treatment = Some(180);
        let vector = extractor.extract(&p, &[], &[]).expect("Should extract");
        assert_eq!(vector.get("days_in_treatment"), Some(180.0));
    }

    #[test]
    fn test_positive_smear_months() {
        let mut p = patient();
        p.bacilloscopy_monthly[0] = "Positive".to_string();
        p.bacilloscopy_monthly[1] = "+".to_string();
        p.bacilloscopy_monthly[2] = "negative".to_string();

        let extractor = FeatureExtractor::new(["bacilloscopy_positive_months"]);
        let vector = extractor.extract(&p, &[], &[]).expect("Should extract");
        assert_eq!(vector.get("bacilloscopy_positive_months"), Some(2.0));
    }

    #[test]
    fn test_feature_vector_json_keeps_order() {
        let vector = FeatureVector::from_pairs([("zeta", 1.0), ("alpha", 2.0)]);
        let json = serde_json::to_string(&vector).expect("Should serialize");
        assert_eq!(json, r#"{"zeta":1.0,"alpha":2.0}"#);

        let back: FeatureVector = serde_json::from_str(&json).expect("Should parse");
        assert_eq!(back, vector);
    }
}
