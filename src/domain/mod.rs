//! Domain layer: Core clinical types and pure logic.
//!
//! Nothing here performs I/O. Feature extraction and risk banding live here
//! because they are pure functions of patient data.

mod features;
mod patient;
mod recommendation;
mod risk;

pub use features::{
    FeatureExtractor, FeatureVector, MissingFeatureError, NamedValues, VisitAggregate,
    DEFAULT_ADHERENCE_MEAN, DEFAULT_ADHERENCE_MIN, DEFAULT_ADHERENCE_STD, DEFAULT_FEATURE_SCHEMA,
};
pub use patient::{
    Comorbidities, MonitoringVisit, OutcomeStatus, PatientRecord, PatientSnapshot, Sex,
    TreatmentModification, BACILLOSCOPY_MONTHS,
};
pub use recommendation::{Priority, Recommendation, RecommendationCategory};
pub use risk::{
    Attribution, PredictionRecord, PredictionResult, RiskCategory, HIGH_RISK_THRESHOLD,
    MEDIUM_RISK_THRESHOLD,
};
