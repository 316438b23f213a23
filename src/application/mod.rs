//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the risk assessment use case.

mod assessment;
pub mod recommendations;
pub mod registry;

pub use assessment::RiskAssessmentService;
pub use recommendations::RecommendationEngine;
pub use registry::{shared_model, SharedModel};
