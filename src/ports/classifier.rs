//! Risk classifier port: Trait for the pre-trained PTLD scoring function.
//!
//! The pipeline only depends on this narrow contract. Training, file formats
//! and model internals belong to the adapter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::FeatureVector;

/// Errors raised by a classifier while scoring.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    #[error("Feature count mismatch: got {got}, expected {expected}")]
    FeatureCount { got: usize, expected: usize },

    #[error("Non-finite feature value for {0}")]
    NonFiniteInput(String),

    #[error("Model evaluation failed: {0}")]
    Evaluation(String),
}

/// Descriptive metadata about a loaded classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_version: String,
    pub features: Vec<String>,
    #[serde(default)]
    pub training_date: Option<String>,
    #[serde(default)]
    pub performance: BTreeMap<String, f64>,
}

/// A versioned binary risk classifier.
///
/// Implementations must be immutable once loaded so a single instance can be
/// shared across concurrent predictions.
pub trait RiskClassifier: Send + Sync {
    /// Score one feature vector.
    ///
    /// # Returns
    /// `(p_low, p_high)`, which must sum to 1.0.
    ///
    /// # Errors
    /// Returns `ClassifierError` if the model cannot evaluate the input.
    fn predict_proba(&self, features: &FeatureVector) -> Result<(f64, f64), ClassifierError>;

    /// Ordered feature names this version expects.
    fn feature_schema(&self) -> &[String];

    /// Version string recorded on every prediction.
    fn version(&self) -> &str;

    /// Metadata for display and audit.
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_version: self.version().to_string(),
            features: self.feature_schema().to_vec(),
            ..ModelInfo::default()
        }
    }
}
