//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `artifact`: signed model artifacts (sha2, ed25519-dalek)
//! - `logistic`: standardized logistic-regression classifier
//! - `shapley`: exact baseline Shapley attribution
//! - `sqlite`: SQLite for patient records and prediction history
//! - `sanitize`: identifier and secret filtering for logs

pub mod artifact;
pub mod logistic;
pub mod sanitize;
pub mod shapley;
pub mod sqlite;

pub use artifact::ArtifactError;
pub use sqlite::StorageError;
