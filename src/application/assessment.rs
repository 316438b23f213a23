//! Risk assessment service: Orchestrates one PTLD prediction.
//!
//! This service coordinates:
//! - Patient lookup
//! - Feature extraction
//! - Classification
//! - Attribution (degrades to zeros on failure)
//! - Recommendation generation (degrades to an empty list on panic)
//! - Persistence of the result

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::adapters::StorageError;
use crate::application::recommendations::RecommendationEngine;
use crate::application::registry::SharedModel;
use crate::domain::{
    Attribution, FeatureExtractor, FeatureVector, PatientRecord, PredictionRecord,
    PredictionResult, Recommendation, RiskCategory,
};
use crate::ports::{AttributionEngine, ModelInfo, PatientRepository, PredictionStore, RiskClassifier};
use crate::PtldError;

/// Tolerance on `p_low + p_high == 1`.
const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Service for running PTLD risk assessments.
///
/// The classifier and attribution engine are shared, read-only handles; the
/// service itself holds no per-request state and can be used from several
/// threads at once.
pub struct RiskAssessmentService<R, S>
where
    R: PatientRepository,
    S: PredictionStore,
{
    repository: Arc<R>,
    store: Arc<S>,
    classifier: Arc<dyn RiskClassifier>,
    attribution: Arc<dyn AttributionEngine>,
    extractor: FeatureExtractor,
    recommendations: RecommendationEngine,
}

impl<R, S> RiskAssessmentService<R, S>
where
    R: PatientRepository,
    S: PredictionStore,
    R::Error: Into<StorageError>,
    S::Error: Into<StorageError>,
{
    /// Create a service around a loaded classifier and attribution engine.
    ///
    /// Features are extracted in the classifier's schema order.
    pub fn new(
        repository: Arc<R>,
        store: Arc<S>,
        classifier: Arc<dyn RiskClassifier>,
        attribution: Arc<dyn AttributionEngine>,
    ) -> Self {
        let extractor = FeatureExtractor::new(classifier.feature_schema().iter().cloned());
        Self {
            repository,
            store,
            classifier,
            attribution,
            extractor,
            recommendations: RecommendationEngine::new(),
        }
    }

    /// Create a service from the process-wide model handle.
    pub fn with_model(repository: Arc<R>, store: Arc<S>, model: &SharedModel) -> Self {
        Self::new(
            repository,
            store,
            Arc::clone(&model.classifier),
            Arc::clone(&model.attribution),
        )
    }

    /// Assess a stored patient and persist the result.
    ///
    /// # Errors
    /// - `MissingPatient` if the identifier does not resolve
    /// - `MissingFeature` if the record cannot fill the schema
    /// - `ClassifierFailure` if scoring fails
    /// - `Storage` if lookup or persistence fails
    pub fn assess(&self, patient_id: &str) -> Result<PredictionRecord, PtldError> {
        tracing::info!("Starting risk assessment for patient {patient_id}");

        let record = self
            .repository
            .load_patient(patient_id)
            .map_err(|e| PtldError::Storage(e.into()))?
            .ok_or_else(|| PtldError::MissingPatient(patient_id.to_string()))?;

        let result = self.predict(&record)?;

        let saved = self
            .store
            .save_prediction(patient_id, &result)
            .map_err(|e| PtldError::Storage(e.into()))?;

        tracing::info!(
            "Assessment complete: prediction={}, risk={}, score={:.3}, recommendations={}",
            saved.prediction_id,
            saved.result.risk_category,
            saved.result.risk_score,
            saved.result.recommendations.len()
        );
        Ok(saved)
    }

    /// Run the pipeline on an in-memory record without persisting.
    ///
    /// # Errors
    /// Returns `MissingFeature` or `ClassifierFailure`; attribution and
    /// recommendation failures are absorbed.
    pub fn predict(&self, record: &PatientRecord) -> Result<PredictionResult, PtldError> {
        // Step 1: Features
        tracing::debug!("Step 1: Extracting features...");
        let features = self.extractor.extract(
            &record.snapshot,
            &record.visits,
            &record.modifications,
        )?;

        // Step 2: Classification
        tracing::debug!("Step 2: Scoring with model {}...", self.classifier.version());
        let (p_low, p_high) = self.classifier.predict_proba(&features)?;
        validate_probabilities(p_low, p_high)?;

        // Step 3: Attribution
        tracing::debug!("Step 3: Computing attribution...");
        let attribution = self.attribute(&features);

        // Step 4: Categorize and recommend
        let result = PredictionResult::new(p_low, p_high, attribution, self.classifier.version());
        tracing::debug!("Step 4: Generating recommendations...");
        let recommendations = self.recommend(
            result.risk_category,
            result.risk_score,
            &features,
            &result.attribution,
        );

        Ok(result.with_recommendations(recommendations))
    }

    fn attribute(&self, features: &FeatureVector) -> Attribution {
        match self.attribution.attribute(features, self.classifier.as_ref()) {
            Ok(attribution) => attribution,
            Err(e) => {
                tracing::warn!("Attribution degraded, defaulting to zeros: {e}");
                Attribution::zeros(self.classifier.feature_schema())
            }
        }
    }

    fn recommend(
        &self,
        category: RiskCategory,
        score: f64,
        features: &FeatureVector,
        attribution: &Attribution,
    ) -> Vec<Recommendation> {
        let engine = &self.recommendations;
        catch_unwind(AssertUnwindSafe(|| {
            engine.generate(category, score, features, attribution)
        }))
        .unwrap_or_else(|_| {
            tracing::warn!("Recommendation generation failed; returning prediction without recommendations");
            Vec::new()
        })
    }

    /// Metadata of the loaded model.
    #[must_use]
    pub fn model_info(&self) -> ModelInfo {
        self.classifier.model_info()
    }

    /// Most recent stored predictions for a patient, newest first.
    ///
    /// # Errors
    /// Returns `Storage` if the query fails.
    pub fn recent_predictions(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, PtldError> {
        self.store
            .load_predictions(patient_id, limit)
            .map_err(|e| PtldError::Storage(e.into()))
    }

    /// Total number of stored predictions.
    ///
    /// # Errors
    /// Returns `Storage` if the query fails.
    pub fn prediction_count(&self) -> Result<usize, PtldError> {
        self.store
            .count_predictions()
            .map_err(|e| PtldError::Storage(e.into()))
    }
}

fn validate_probabilities(p_low: f64, p_high: f64) -> Result<(), PtldError> {
    let in_range = |p: f64| p.is_finite() && (0.0..=1.0).contains(&p);
    if !in_range(p_low) || !in_range(p_high) {
        return Err(PtldError::ClassifierFailure(format!(
            "probabilities out of range: ({p_low}, {p_high})"
        )));
    }
    if (p_low + p_high - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(PtldError::ClassifierFailure(format!(
            "probabilities do not sum to 1: ({p_low}, {p_high})"
        )));
    }
    Ok(())
}
