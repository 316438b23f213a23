//! Shapley adapter: Exact baseline Shapley attribution.
//!
//! Model-agnostic: only uses `RiskClassifier::predict_proba`. For a coalition
//! `S`, features in `S` take the patient's value and the rest take the
//! baseline value. Contributions are measured on the log-odds of `p_high`, so
//!
//! `Σ φ_i = logit(f(x)) − logit(f(baseline))`
//!
//! Cost is `2^n` classifier evaluations, so schemas are capped at
//! `MAX_EXACT_FEATURES`.

use crate::domain::{Attribution, FeatureVector};
use crate::ports::{AttributionEngine, AttributionError, RiskClassifier};

/// Largest schema attributed exactly (65 536 evaluations).
pub const MAX_EXACT_FEATURES: usize = 16;

/// Probabilities are clamped away from 0 and 1 before taking log-odds.
const PROBABILITY_EPSILON: f64 = 1e-12;

/// Exact interventional Shapley values against a single baseline.
#[derive(Debug, Clone)]
pub struct ShapleyAttribution {
    baseline: FeatureVector,
}

impl ShapleyAttribution {
    /// Attribution relative to `baseline` (typically the training means).
    #[must_use]
    pub fn new(baseline: FeatureVector) -> Self {
        Self { baseline }
    }

    #[must_use]
    pub fn baseline(&self) -> &FeatureVector {
        &self.baseline
    }
}

impl AttributionEngine for ShapleyAttribution {
    fn attribute(
        &self,
        features: &FeatureVector,
        classifier: &dyn RiskClassifier,
    ) -> Result<Attribution, AttributionError> {
        let schema = classifier.feature_schema();
        let n = schema.len();

        if n > MAX_EXACT_FEATURES {
            return Err(AttributionError::TooManyFeatures {
                count: n,
                max: MAX_EXACT_FEATURES,
            });
        }
        if !self.baseline.matches_schema(schema) {
            return Err(AttributionError::BaselineMismatch);
        }
        if !features.matches_schema(schema) {
            return Err(AttributionError::Unsupported(
                "feature vector does not follow the classifier schema".into(),
            ));
        }

        let x = features.values();
        let b = self.baseline.values();

        // v[mask]: log-odds with features in `mask` taken from x, others from b
        let coalitions = 1usize << n;
        let mut v = Vec::with_capacity(coalitions);
        let mut mixed = b.clone();
        for mask in 0..coalitions {
            for (i, slot) in mixed.iter_mut().enumerate() {
                *slot = if mask & (1 << i) != 0 { x[i] } else { b[i] };
            }
            let (_, p_high) = classifier.predict_proba(&FeatureVector::from_schema(schema, &mixed))?;
            v.push(log_odds(p_high));
        }

        let weights = coalition_weights(n);
        let mut phi = vec![0.0; n];
        for (i, phi_i) in phi.iter_mut().enumerate() {
            let bit = 1usize << i;
            for mask in (0..coalitions).filter(|m| m & bit == 0) {
                let size = mask.count_ones() as usize;
                *phi_i += weights[size] * (v[mask | bit] - v[mask]);
            }
        }

        tracing::debug!(
            "Computed exact Shapley attribution over {} features ({} evaluations)",
            n,
            coalitions
        );

        Ok(Attribution::from_pairs(schema.iter().cloned().zip(phi)))
    }
}

fn log_odds(p: f64) -> f64 {
    let p = p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
    (p / (1.0 - p)).ln()
}

/// `w[s] = s! (n - s - 1)! / n!` for coalition sizes `s` in `0..n`.
fn coalition_weights(n: usize) -> Vec<f64> {
    let mut factorial = vec![1.0_f64; n + 1];
    for k in 1..=n {
        factorial[k] = factorial[k - 1] * k as f64;
    }
    (0..n)
        .map(|s| factorial[s] * factorial[n - s - 1] / factorial[n])
        .collect()
}
