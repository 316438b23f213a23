//! Storage ports: Patient lookup and prediction persistence.
//!
//! Both are owned by the surrounding record-management system. The pipeline
//! reads patient records through one and hands results to the other.

use crate::domain::{PatientRecord, PredictionRecord, PredictionResult};

/// Resolves a patient identifier to a full record.
pub trait PatientRepository: Send + Sync {
    /// Error type for lookups.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the snapshot, visits and modifications for `patient_id`.
    ///
    /// # Returns
    /// `None` if the identifier does not resolve.
    ///
    /// # Errors
    /// Returns error if the backing store fails.
    fn load_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, Self::Error>;
}

/// Persists prediction results.
pub trait PredictionStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a result, assigning it a unique identifier and timestamp.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_prediction(
        &self,
        patient_id: &str,
        result: &PredictionResult,
    ) -> Result<PredictionRecord, Self::Error>;

    /// Most recent predictions for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_predictions(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, Self::Error>;

    /// Total number of stored predictions.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count_predictions(&self) -> Result<usize, Self::Error>;
}
