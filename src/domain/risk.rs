//! Risk prediction result types.
//!
//! Represents the output of the PTLD risk pipeline.

use serde::{Deserialize, Serialize};

use super::features::NamedValues;
use super::recommendation::Recommendation;

/// Scores below this are `Low`.
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.33;
/// Scores at or above this are `High`.
pub const HIGH_RISK_THRESHOLD: f64 = 0.66;

/// Ordinal risk band for post-treatment lung disease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    /// Map a continuous score to its band.
    ///
    /// Lower bounds are inclusive: exactly 0.33 is `Medium`, exactly 0.66 is `High`.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < MEDIUM_RISK_THRESHOLD {
            Self::Low
        } else if score < HIGH_RISK_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse the storage form. Unknown strings yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - routine monitoring",
            Self::Medium => "Medium risk - enhanced monitoring recommended",
            Self::High => "High risk - intensive follow-up advised",
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Signed per-feature contribution to a single prediction.
///
/// Positive values pushed the score toward higher risk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribution(NamedValues);

impl Attribution {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(NamedValues::from_pairs(pairs))
    }

    /// All-zero attribution over `schema`, used when attribution degrades.
    #[must_use]
    pub fn zeros(schema: &[String]) -> Self {
        Self::from_pairs(schema.iter().map(|name| (name.clone(), 0.0)))
    }

    /// Contribution for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name)
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
    pub fn total(&self) -> f64 {
        self.0.values().iter().sum()
    }

    /// Up to `n` features with strictly positive contribution, largest first.
    ///
    /// Equal values keep their schema order.
    #[must_use]
    pub fn top_positive(&self, n: usize) -> Vec<(&str, f64)> {
        let mut positive: Vec<(&str, f64)> = self.iter().filter(|(_, v)| *v > 0.0).collect();
        positive.sort_by(|a, b| b.1.total_cmp(&a.1));
        positive.truncate(n);
        positive
    }
}

/// Outcome of one run of the risk pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Probability of the high-risk class (0.0 to 1.0)
    pub risk_score: f64,

    pub risk_category: RiskCategory,

    /// Per-feature explanation of `risk_score`
    pub attribution: Attribution,

    /// Classifier version that produced the score
    pub model_version: String,

    /// max(p_low, p_high)
    pub confidence: f64,

    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

impl PredictionResult {
    /// Build a result from the classifier's two-class output.
    #[must_use]
    pub fn new(
        p_low: f64,
        p_high: f64,
        attribution: Attribution,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            risk_score: p_high,
            risk_category: RiskCategory::from_score(p_high),
            attribution,
            model_version: model_version.into(),
            confidence: p_low.max(p_high),
            recommendations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_recommendations(mut self, recommendations: Vec<Recommendation>) -> Self {
        self.recommendations = recommendations;
        self
    }
}

/// A prediction as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub patient_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub result: PredictionResult,
}

impl PredictionRecord {
    /// Assign a fresh identifier and the current time to `result`.
    #[must_use]
    pub fn new(patient_id: impl Into<String>, result: PredictionResult) -> Self {
        let patient_id = patient_id.into();
        Self {
            prediction_id: prediction_id(&patient_id),
            patient_id,
            timestamp: chrono::Utc::now(),
            result,
        }
    }
}

/// Generate a `PR-<patient>-<16 hex>` identifier using a CSPRNG.
fn prediction_id(patient_id: &str) -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let bytes: [u8; 8] = rng.gen();
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("PR-{patient_id}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_thresholds() {
        assert_eq!(RiskCategory::from_score(0.0), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.3299), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.33), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(0.6599), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(0.66), RiskCategory::High);
        assert_eq!(RiskCategory::from_score(1.0), RiskCategory::High);
    }

    #[test]
    fn test_category_parse_roundtrip() {
        for category in [RiskCategory::Low, RiskCategory::Medium, RiskCategory::High] {
            assert_eq!(RiskCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(RiskCategory::parse("moderate"), None);
    }

    #[test]
    fn test_result_confidence_is_larger_class() {
        let result = PredictionResult::new(0.2, 0.8, Attribution::default(), "v1.0.0");
        assert_eq!(result.risk_category, RiskCategory::High);
        assert!((result.confidence - 0.8).abs() < f64::EPSILON);

        let result = PredictionResult::new(0.9, 0.1, Attribution::default(), "v1.0.0");
        assert_eq!(result.risk_category, RiskCategory::Low);
        assert!((result.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_top_positive_ties_keep_schema_order() {
        let attribution = Attribution::from_pairs([
            ("age", 0.2),
            ("hiv_positive", -0.5),
            ("diabetes", 0.3),
            ("smoker", 0.2),
            ("comorbidity_count", 0.0),
            ("visit_count", 0.2),
        ]);
        let top = attribution.top_positive(3);
        assert_eq!(top, vec![("diabetes", 0.3), ("age", 0.2), ("smoker", 0.2)]);
    }

    #[test]
    fn test_zeros_cover_schema() {
        let schema = vec!["age".to_string(), "smoker".to_string()];
        let attribution = Attribution::zeros(&schema);
        assert_eq!(attribution.len(), 2);
        assert_eq!(attribution.get("smoker"), Some(0.0));
        assert!(attribution.top_positive(3).is_empty());
    }

    #[test]
    fn test_prediction_ids_are_unique() {
        let result = PredictionResult::new(0.5, 0.5, Attribution::default(), "v1.0.0");
        let a = PredictionRecord::new("PT-00001", result.clone());
        let b = PredictionRecord::new("PT-00001", result);
        assert_ne!(a.prediction_id, b.prediction_id);
        assert!(a.prediction_id.starts_with("PR-PT-00001-"));
    }
}
