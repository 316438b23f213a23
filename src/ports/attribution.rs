//! Attribution port: Trait for explaining a single prediction.

use crate::domain::{Attribution, FeatureVector};
use crate::ports::{ClassifierError, RiskClassifier};

/// Errors that can occur while computing attributions.
///
/// These never fail a prediction; the pipeline degrades to zero attribution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttributionError {
    #[error("Unsupported classifier: {0}")]
    Unsupported(String),

    #[error("Too many features for exact attribution: {count} (max {max})")]
    TooManyFeatures { count: usize, max: usize },

    #[error("Baseline does not match the classifier feature schema")]
    BaselineMismatch,

    #[error("Classifier failed during attribution: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Trait for per-feature attribution.
///
/// Implementations produce one signed value per schema feature. Positive values
/// pushed the prediction toward higher risk; values are additive relative to a
/// baseline expectation.
pub trait AttributionEngine: Send + Sync {
    /// Explain the classifier's output for `features`.
    ///
    /// # Errors
    /// Returns `AttributionError` if the method cannot be applied to this
    /// classifier or input.
    fn attribute(
        &self,
        features: &FeatureVector,
        classifier: &dyn RiskClassifier,
    ) -> Result<Attribution, AttributionError>;
}
