//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the risk pipeline and its collaborators (model artifacts,
//! patient records, prediction persistence).

mod attribution;
mod classifier;
mod storage;

pub use attribution::{AttributionEngine, AttributionError};
pub use classifier::{ClassifierError, ModelInfo, RiskClassifier};
pub use storage::{PatientRepository, PredictionStore};
