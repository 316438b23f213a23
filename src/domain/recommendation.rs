//! Clinical recommendation types.

use serde::{Deserialize, Serialize};

/// Urgency of a recommendation. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Sort weight: high=3, medium=2, low=1.
    #[must_use]
    pub fn weight(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

/// Clinical area a recommendation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Monitoring,
    Treatment,
    Adherence,
    Comorbidities,
    Demographics,
    Lifestyle,
}

/// A single piece of clinical guidance attached to a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: Priority,
    /// Deduplication key
    pub title: String,
    pub description: String,
    /// Distinct action strings; order carries no meaning
    pub actions: Vec<String>,
}

impl Recommendation {
    #[must_use]
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}
