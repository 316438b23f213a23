//! Logistic adapter: Implementation of `RiskClassifier` for standardized
//! logistic-regression artifacts.
//!
//! Score: `z = intercept + Σ coef_i · (x_i − mean_i) / scale_i`,
//! `p_high = sigmoid(z)`, optionally passed through an isotonic calibration
//! table (piecewise-linear between breakpoints, clamped at both ends).

use crate::adapters::artifact::{ArtifactError, ArtifactStore, CalibrationTable, LogisticModelSpec};
use crate::domain::FeatureVector;
use crate::ports::{ClassifierError, ModelInfo, RiskClassifier};

/// Upper bound on schema size accepted from an artifact.
const MAX_FEATURES: usize = 64;

/// Pre-trained PTLD classifier loaded from a model artifact.
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    spec: LogisticModelSpec,
    info: ModelInfo,
}

impl LogisticClassifier {
    /// Validate exported parameters and build the classifier.
    ///
    /// # Errors
    /// Returns `ArtifactError::Format` if parameter lengths disagree, a scale is
    /// zero, or the calibration table is malformed.
    pub fn from_spec(spec: LogisticModelSpec) -> Result<Self, ArtifactError> {
        let n = spec.feature_cols.len();
        let invalid = |message: String| ArtifactError::Format {
            file: "model.json",
            message,
        };

        if n == 0 || n > MAX_FEATURES {
            return Err(invalid(format!(
                "feature count {n} outside 1..={MAX_FEATURES}"
            )));
        }
        if spec.coefficients.len() != n
            || spec.scaler_mean.len() != n
            || spec.scaler_scale.len() != n
        {
            return Err(invalid(
                "parameter lengths do not match feature_cols length".into(),
            ));
        }
        if let Some(baseline) = &spec.baseline {
            if baseline.len() != n {
                return Err(invalid("baseline length does not match feature_cols".into()));
            }
        }
        if spec.scaler_scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(invalid("scaler_scale entries must be finite and non-zero".into()));
        }
        let mut all_params = spec
            .coefficients
            .iter()
            .chain(&spec.scaler_mean)
            .chain(std::iter::once(&spec.intercept));
        if all_params.any(|v| !v.is_finite()) {
            return Err(invalid("non-finite model parameter".into()));
        }
        if let Some(table) = &spec.calibration {
            validate_calibration(table).map_err(invalid)?;
        }

        let info = ModelInfo {
            model_version: spec.model_version.clone(),
            features: spec.feature_cols.clone(),
            ..ModelInfo::default()
        };

        Ok(Self { spec, info })
    }

    /// Load and verify the artifact, then build the classifier.
    ///
    /// Training metadata, when present, replaces the default `ModelInfo`.
    ///
    /// # Errors
    /// Returns `ArtifactError` if verification or validation fails.
    pub fn load(store: &ArtifactStore) -> Result<Self, ArtifactError> {
        let artifact = store.load()?;
        let mut classifier = Self::from_spec(artifact.model)?;
        if let Some(metadata) = artifact.metadata {
            classifier.info = metadata.into_model_info();
        }
        Ok(classifier)
    }

    /// Feature values representing the training population's expectation.
    #[must_use]
    pub fn baseline(&self) -> FeatureVector {
        let values = self.spec.baseline.as_ref().unwrap_or(&self.spec.scaler_mean);
        FeatureVector::from_schema(&self.spec.feature_cols, values)
    }

    fn logit(&self, values: &[f64]) -> f64 {
        self.spec
            .coefficients
            .iter()
            .zip(&self.spec.scaler_mean)
            .zip(&self.spec.scaler_scale)
            .zip(values)
            .fold(self.spec.intercept, |acc, (((coef, mean), scale), x)| {
                acc + coef * (x - mean) / scale
            })
    }
}

impl RiskClassifier for LogisticClassifier {
    fn predict_proba(&self, features: &FeatureVector) -> Result<(f64, f64), ClassifierError> {
        let expected = self.spec.feature_cols.len();
        if features.len() != expected {
            return Err(ClassifierError::FeatureCount {
                got: features.len(),
                expected,
            });
        }
        if !features.matches_schema(&self.spec.feature_cols) {
            return Err(ClassifierError::Evaluation(
                "feature names do not match model schema".into(),
            ));
        }
        if let Some((name, _)) = features.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteInput(name.to_string()));
        }

        let raw = sigmoid(self.logit(&features.values()));
        let p_high = match &self.spec.calibration {
            Some(table) => calibrate(table, raw),
            None => raw,
        }
        .clamp(0.0, 1.0);

        Ok((1.0 - p_high, p_high))
    }

    fn feature_schema(&self) -> &[String] {
        &self.spec.feature_cols
    }

    fn version(&self) -> &str {
        &self.spec.model_version
    }

    fn model_info(&self) -> ModelInfo {
        self.info.clone()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn validate_calibration(table: &CalibrationTable) -> Result<(), String> {
    if table.x.len() < 2 || table.x.len() != table.y.len() {
        return Err("calibration needs at least two x/y breakpoints of equal length".into());
    }
    if table.x.windows(2).any(|w| w[1] <= w[0]) {
        return Err("calibration x must be strictly increasing".into());
    }
    if table.y.windows(2).any(|w| w[1] < w[0]) {
        return Err("calibration y must be non-decreasing".into());
    }
    if table.y.iter().any(|y| !(0.0..=1.0).contains(y)) {
        return Err("calibration y must lie in [0, 1]".into());
    }
    Ok(())
}

/// Piecewise-linear interpolation over a validated table.
fn calibrate(table: &CalibrationTable, p: f64) -> f64 {
    let (xs, ys) = (&table.x, &table.y);
    let last = xs.len() - 1;
    if p <= xs[0] {
        return ys[0];
    }
    if p >= xs[last] {
        return ys[last];
    }
    // partition_point gives the first breakpoint strictly above p; 1..=last here
    let hi = xs.partition_point(|x| *x <= p);
    let lo = hi - 1;
    let t = (p - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + t * (ys[hi] - ys[lo])
}
