//! # PTLD Guard
//!
//! Post-tuberculosis lung disease (PTLD) risk assessment pipeline.
//!
//! This crate provides:
//! - Feature extraction from TB patient snapshots, visits and treatment changes
//! - Risk scoring through a signed, pre-trained classifier artifact
//! - Per-feature attribution and rule-based clinical recommendations
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core clinical types (patients, features, risk bands, recommendations)
//! - `ports`: Trait definitions for the classifier, attribution and storage
//! - `adapters`: Concrete implementations (signed artifacts, logistic model, Shapley, SQLite)
//! - `application`: Risk assessment use case and recommendation rules
//! - `config`: Environment-driven settings

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{FeatureVector, PredictionResult, RiskCategory};

/// Result type for PTLD pipeline operations
pub type Result<T> = std::result::Result<T, PtldError>;

/// Main error type for the PTLD pipeline
#[derive(Debug, thiserror::Error)]
pub enum PtldError {
    #[error("Patient not found: {0}")]
    MissingPatient(String),

    #[error(transparent)]
    MissingFeature(#[from] domain::MissingFeatureError),

    #[error("Classifier failure: {0}")]
    ClassifierFailure(String),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Model artifact error: {0}")]
    Artifact(#[from] adapters::ArtifactError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PtldError {
    /// Whether the caller supplied bad input (unknown patient, incomplete record)
    /// rather than the system failing.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingPatient(_) | Self::MissingFeature(_))
    }
}

impl From<ports::ClassifierError> for PtldError {
    fn from(e: ports::ClassifierError) -> Self {
        Self::ClassifierFailure(e.to_string())
    }
}
