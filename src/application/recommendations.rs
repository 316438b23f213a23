//! Recommendation engine: Maps a risk band, features and attribution to
//! clinical guidance.
//!
//! Rules are evaluated in a fixed order (base table, attribution-driven
//! feature rules, adherence, comorbidities). Recommendations sharing a title
//! are merged, keeping the first occurrence's metadata and appending unseen
//! actions. The result is stably sorted by priority, highest first.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::domain::{
    Attribution, FeatureVector, Priority, Recommendation, RecommendationCategory, RiskCategory,
};

use Priority::{High, Low, Medium};
use RecommendationCategory as Cat;

/// Attribution above which a comorbidity counts as driving risk.
const COMORBIDITY_CONTRIBUTION_THRESHOLD: f64 = 0.1;

/// Number of top risk-increasing features considered for feature rules.
const TOP_FEATURES: usize = 3;

const CRITICAL_ADHERENCE: f64 = 80.0;
const TARGET_ADHERENCE: f64 = 90.0;

struct Template {
    category: RecommendationCategory,
    priority: Priority,
    title: &'static str,
    description: &'static str,
    actions: &'static [&'static str],
}

impl Template {
    fn build(&self) -> Recommendation {
        self.build_with(self.priority, self.description.to_string())
    }

    fn build_with(&self, priority: Priority, description: String) -> Recommendation {
        Recommendation {
            category: self.category,
            priority,
            title: self.title.to_string(),
            description,
            actions: self.actions.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

const LOW_RISK: &[Template] = &[Template {
    category: Cat::Monitoring,
    priority: Low,
    title: "Routine Monitoring",
    description: "Continue standard TB treatment monitoring protocols.",
    actions: &[
        "Maintain current treatment regimen",
        "Schedule routine follow-up visits every 2-3 months",
        "Monitor adherence and adverse reactions",
    ],
}];

const MEDIUM_RISK: &[Template] = &[
    Template {
        category: Cat::Monitoring,
        priority: Medium,
        title: "Enhanced Monitoring",
        description: "Increase monitoring frequency and assess treatment response.",
        actions: &[
            "Schedule follow-up visits monthly",
            "Monitor adherence closely (target >90%)",
            "Consider chest X-ray every 3 months",
            "Assess for treatment modifications if needed",
        ],
    },
    Template {
        category: Cat::Adherence,
        priority: Medium,
        title: "Adherence Support",
        description: "Provide additional support to improve treatment adherence.",
        actions: &[
            "Counsel patient on importance of adherence",
            "Consider directly observed therapy (DOT)",
            "Address barriers to adherence",
        ],
    },
];

const HIGH_RISK: &[Template] = &[
    Template {
        category: Cat::Monitoring,
        priority: High,
        title: "Intensive Monitoring",
        description: "High risk detected. Implement intensive monitoring protocol.",
        actions: &[
            "Schedule follow-up visits every 2-4 weeks",
            "Perform chest X-ray every 2-3 months",
            "Monitor lung function tests",
            "Consider referral to pulmonologist",
        ],
    },
    Template {
        category: Cat::Treatment,
        priority: High,
        title: "Treatment Review",
        description: "Review current treatment regimen for optimization.",
        actions: &[
            "Assess treatment response and efficacy",
            "Consider treatment modification if indicated",
            "Review drug interactions and adverse effects",
            "Optimize drug dosages based on patient factors",
        ],
    },
    Template {
        category: Cat::Comorbidities,
        priority: High,
        title: "Comorbidity Management",
        description: "Manage comorbidities that may increase PTLD risk.",
        actions: &[
            "Optimize management of existing comorbidities",
            "Screen for and manage diabetes if present",
            "Provide smoking cessation support if applicable",
            "Ensure HIV treatment is optimized if HIV-positive",
        ],
    },
];

const AGE_RISK: Template = Template {
    category: Cat::Demographics,
    priority: Low,
    title: "Age-Related Risk Management",
    description: "",
    actions: &[
        "Consider age-appropriate treatment adjustments",
        "Monitor for age-related complications",
        "Ensure adequate nutritional support",
    ],
};

const MULTIPLE_COMORBIDITIES: Template = Template {
    category: Cat::Comorbidities,
    priority: Medium,
    title: "Multiple Comorbidities",
    description: "",
    actions: &[
        "Coordinate care with specialists",
        "Review medication interactions",
        "Monitor for complications",
        "Consider treatment modifications",
    ],
};

const COMORBIDITY_MANAGEMENT: Template = Template {
    category: Cat::Comorbidities,
    priority: Medium,
    title: "Comorbidity Management",
    description: "",
    actions: &[
        "Coordinate care with relevant specialists",
        "Review medication interactions",
        "Monitor for complications",
        "Consider CT scan for detailed assessment",
        "Monitor for progression of lung changes",
        "Assess response to treatment",
    ],
};

const TREATMENT_STABILITY: Template = Template {
    category: Cat::Treatment,
    priority: Medium,
    title: "Treatment Stability",
    description: "",
    actions: &[
        "Review reasons for previous modifications",
        "Assess current treatment efficacy",
        "Consider treatment optimization",
        "Monitor for adverse reactions",
    ],
};

const CRITICAL_ADHERENCE_INTERVENTION: Template = Template {
    category: Cat::Adherence,
    priority: Medium,
    title: "Critical Adherence Intervention",
    description: "",
    actions: &[
        "Implement directly observed therapy (DOT)",
        "Identify and address adherence barriers",
        "Provide patient education on importance of adherence",
        "Consider treatment simplification if possible",
        "Schedule more frequent follow-ups to monitor adherence",
    ],
};

const ADHERENCE_IMPROVEMENT: Template = Template {
    category: Cat::Adherence,
    priority: Medium,
    title: "Adherence Improvement",
    description: "",
    actions: &[
        "Counsel patient on importance of consistent adherence",
        "Identify barriers to adherence",
        "Consider adherence support interventions",
        "Monitor adherence closely",
    ],
};

/// Comorbidity flag (also its attribution key) and the guidance it triggers.
const COMORBIDITY_RULES: &[(&str, Template)] = &[
    (
        "hiv_positive",
        Template {
            category: Cat::Comorbidities,
            priority: High,
            title: "HIV Co-infection Management",
            description: "HIV co-infection is contributing to increased PTLD risk.",
            actions: &[
                "Ensure optimal HIV treatment (ART)",
                "Monitor CD4 count and viral load",
                "Assess for drug interactions between TB and HIV medications",
                "Coordinate care with HIV specialist",
                "Monitor for opportunistic infections",
            ],
        },
    ),
    (
        "diabetes",
        Template {
            category: Cat::Comorbidities,
            priority: High,
            title: "Diabetes Management",
            description: "Diabetes is contributing to increased PTLD risk.",
            actions: &[
                "Optimize diabetes control (target HbA1c <7%)",
                "Monitor blood glucose levels",
                "Assess for diabetic complications",
                "Coordinate with endocrinologist if needed",
                "Consider impact of TB medications on glucose control",
            ],
        },
    ),
    (
        "smoker",
        Template {
            category: Cat::Lifestyle,
            priority: High,
            title: "Smoking Cessation",
            description: "Smoking is significantly contributing to PTLD risk.",
            actions: &[
                "Provide smoking cessation counseling",
                "Offer smoking cessation support (counseling, medications)",
                "Monitor smoking status at each visit",
                "Educate on risks of continued smoking",
                "Consider referral to smoking cessation program",
            ],
        },
    ),
];

/// Ordered, title-deduplicated recommendation list.
#[derive(Default)]
struct RecommendationSet {
    items: Vec<Recommendation>,
    by_title: HashMap<String, usize>,
}

impl RecommendationSet {
    fn push(&mut self, rec: Recommendation) {
        if let Some(&index) = self.by_title.get(&rec.title) {
            let existing = &mut self.items[index];
            for action in rec.actions {
                if !existing.has_action(&action) {
                    existing.actions.push(action);
                }
            }
        } else {
            self.by_title.insert(rec.title.clone(), self.items.len());
            self.items.push(rec);
        }
    }

    fn into_sorted(mut self) -> Vec<Recommendation> {
        // sort_by_key is stable: equal priorities keep generation order
        self.items.sort_by_key(|r| Reverse(r.priority.weight()));
        self.items
    }
}

/// Stateless rule engine producing clinical recommendations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generate recommendations for one prediction.
    ///
    /// Features missing from `features` read as zero. A missing
    /// `adherence_mean` skips the adherence rules entirely.
    #[must_use]
    pub fn generate(
        &self,
        category: RiskCategory,
        risk_score: f64,
        features: &FeatureVector,
        attribution: &Attribution,
    ) -> Vec<Recommendation> {
        let mut set = RecommendationSet::default();
        let high_risk = category == RiskCategory::High;
        let value = |name: &str| features.get(name).unwrap_or(0.0);

        let base = match category {
            RiskCategory::Low => LOW_RISK,
            RiskCategory::Medium => MEDIUM_RISK,
            RiskCategory::High => HIGH_RISK,
        };
        for template in base {
            set.push(template.build());
        }

        for (feature, _) in attribution.top_positive(TOP_FEATURES) {
            match feature {
                "age" if value("age") > 60.0 => {
                    let priority = if high_risk { Medium } else { Low };
                    set.push(AGE_RISK.build_with(
                        priority,
                        format!(
                            "Patient age ({} years) is contributing to increased risk.",
                            value("age")
                        ),
                    ));
                }
                "comorbidity_count" if value("comorbidity_count") >= 3.0 => {
                    let priority = if high_risk { High } else { Medium };
                    set.push(MULTIPLE_COMORBIDITIES.build_with(
                        priority,
                        format!(
                            "Patient has {} comorbidities, which increases PTLD risk.",
                            value("comorbidity_count")
                        ),
                    ));
                }
                "comorbidity_count" if value("comorbidity_count") >= 2.0 => {
                    set.push(COMORBIDITY_MANAGEMENT.build_with(
                        Medium,
                        format!(
                            "Patient has {} comorbidities requiring attention.",
                            value("comorbidity_count")
                        ),
                    ));
                }
                "modification_count" if value("modification_count") > 2.0 => {
                    set.push(TREATMENT_STABILITY.build_with(
                        Medium,
                        format!(
                            "Multiple treatment modifications ({}) may indicate treatment challenges.",
                            value("modification_count")
                        ),
                    ));
                }
                _ => {}
            }
        }

        if let Some(adherence) = features.get("adherence_mean") {
            if adherence < CRITICAL_ADHERENCE {
                let priority = if high_risk { High } else { Medium };
                set.push(CRITICAL_ADHERENCE_INTERVENTION.build_with(
                    priority,
                    format!("Low adherence ({adherence:.1}%) is significantly impacting risk."),
                ));
            } else if adherence < TARGET_ADHERENCE {
                set.push(ADHERENCE_IMPROVEMENT.build_with(
                    Medium,
                    format!("Adherence ({adherence:.1}%) is below optimal target (90%+)."),
                ));
            }
        }

        for (flag, template) in COMORBIDITY_RULES {
            let present = (value(*flag) - 1.0).abs() < f64::EPSILON;
            let contribution = attribution.get(*flag).unwrap_or(0.0);
            if present && contribution > COMORBIDITY_CONTRIBUTION_THRESHOLD {
                set.push(template.build());
            }
        }

        let recommendations = set.into_sorted();
        tracing::debug!(
            "Generated {} recommendations for {} risk (score {:.3})",
            recommendations.len(),
            category.as_str(),
            risk_score
        );
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn titles(recs: &[Recommendation]) -> Vec<&str> {
        recs.iter().map(|r| r.title.as_str()).collect()
    }

    fn find<'a>(recs: &'a [Recommendation], title: &str) -> &'a Recommendation {
        recs.iter()
            .find(|r| r.title == title)
            .unwrap_or_else(|| panic!("missing {title}"))
    }

    fn assert_sorted_and_unique(recs: &[Recommendation]) {
        assert!(recs
            .windows(2)
            .all(|w| w[0].priority.weight() >= w[1].priority.weight()));
        let unique: HashSet<_> = recs.iter().map(|r| &r.title).collect();
        assert_eq!(unique.len(), recs.len());
    }

    #[test]
    fn test_low_risk_adherent_patient() {
        let features = FeatureVector::from_pairs([("age", 35.0), ("adherence_mean", 96.0)]);
        let recs = RecommendationEngine::new().generate(
            RiskCategory::Low,
            0.12,
            &features,
            &Attribution::default(),
        );
        assert_eq!(titles(&recs), vec!["Routine Monitoring"]);
        assert_eq!(recs[0].priority, Priority::Low);
    }

    #[test]
    fn test_hiv_and_poor_adherence_on_high_risk() {
        let features = FeatureVector::from_pairs([("hiv_positive", 1.0), ("adherence_mean", 72.0)]);
        let attribution = Attribution::from_pairs([("hiv_positive", 0.15), ("adherence_mean", -0.3)]);

        let recs =
            RecommendationEngine::new().generate(RiskCategory::High, 0.81, &features, &attribution);

        let hiv = find(&recs, "HIV Co-infection Management");
        assert_eq!(hiv.priority, Priority::High);
        let adherence = find(&recs, "Critical Adherence Intervention");
        assert_eq!(adherence.priority, Priority::High);
        assert!(adherence.description.contains("72.0%"));
        assert_sorted_and_unique(&recs);

        // Base entries keep their place ahead of same-priority additions
        assert_eq!(
            titles(&recs)[..3],
            ["Intensive Monitoring", "Treatment Review", "Comorbidity Management"]
        );
        let position = |title: &str| {
            recs.iter()
                .position(|r| r.title == title)
                .unwrap_or_else(|| panic!("missing {title}"))
        };
        assert!(position("Critical Adherence Intervention") >= 3);
        assert!(position("HIV Co-infection Management") >= 3);
    }

    #[test]
    fn test_comorbidity_threshold_is_strict() {
        let features =
            FeatureVector::from_pairs([("diabetes", 1.0), ("smoker", 1.0), ("hiv_positive", 1.0)]);
        let attribution = Attribution::from_pairs([
            ("diabetes", 0.1),
            ("smoker", 0.2),
            ("hiv_positive", -0.4),
        ]);

        let recs =
            RecommendationEngine::new().generate(RiskCategory::Medium, 0.5, &features, &attribution);

        assert!(recs.iter().all(|r| r.title != "Diabetes Management"));
        // Risk-reducing attribution never fires a comorbidity rule
        assert!(recs.iter().all(|r| r.title != "HIV Co-infection Management"));
        let smoking = find(&recs, "Smoking Cessation");
        assert_eq!(smoking.category, RecommendationCategory::Lifestyle);
    }

    #[test]
    fn test_flag_off_suppresses_comorbidity_rule() {
        let features = FeatureVector::from_pairs([("hiv_positive", 0.0)]);
        let attribution = Attribution::from_pairs([("hiv_positive", 0.9)]);
        let recs =
            RecommendationEngine::new().generate(RiskCategory::High, 0.9, &features, &attribution);
        assert!(recs.iter().all(|r| r.title != "HIV Co-infection Management"));
    }

    #[test]
    fn test_duplicate_title_merges_actions() {
        let features = FeatureVector::from_pairs([("comorbidity_count", 2.0)]);
        let attribution = Attribution::from_pairs([("comorbidity_count", 0.4)]);

        let recs =
            RecommendationEngine::new().generate(RiskCategory::High, 0.7, &features, &attribution);

        let merged: Vec<_> = recs
            .iter()
            .filter(|r| r.title == "Comorbidity Management")
            .collect();
        assert_eq!(merged.len(), 1);
        // Metadata comes from the base-table entry seen first
        assert_eq!(merged[0].priority, Priority::High);
        assert_eq!(
            merged[0].description,
            "Manage comorbidities that may increase PTLD risk."
        );
        // 4 base actions plus 6 from the feature rule, all distinct. "Monitor for
        // complications" and "Consider CT scan for detailed assessment" are
        // separate actions, not one concatenated string.
        assert_eq!(merged[0].actions.len(), 10);
        assert!(merged[0].has_action("Screen for and manage diabetes if present"));
        assert!(merged[0].has_action("Monitor for complications"));
        assert!(merged[0].has_action("Consider CT scan for detailed assessment"));
        assert_sorted_and_unique(&recs);
    }

    #[test]
    fn test_age_rule_priority_follows_band() {
        let features = FeatureVector::from_pairs([("age", 67.0), ("adherence_mean", 95.0)]);
        let attribution = Attribution::from_pairs([("age", 0.3), ("adherence_mean", -0.1)]);
        let engine = RecommendationEngine::new();

        let medium = engine.generate(RiskCategory::Medium, 0.5, &features, &attribution);
        let age = find(&medium, "Age-Related Risk Management");
        assert_eq!(age.priority, Priority::Low);
        assert!(age.description.contains("67 years"));

        let high = engine.generate(RiskCategory::High, 0.8, &features, &attribution);
        assert_eq!(
            find(&high, "Age-Related Risk Management").priority,
            Priority::Medium
        );
    }

    #[test]
    fn test_only_top_three_features_trigger_rules() {
        let features = FeatureVector::from_pairs([
            ("age", 72.0),
            ("modification_count", 4.0),
            ("visit_count", 3.0),
            ("adherence_std", 12.0),
            ("adherence_min", 40.0),
        ]);
        let attribution = Attribution::from_pairs([
            ("age", 0.05),
            ("modification_count", 0.6),
            ("visit_count", 0.7),
            ("adherence_std", 0.8),
            ("adherence_min", 0.9),
        ]);

        let recs =
            RecommendationEngine::new().generate(RiskCategory::Medium, 0.6, &features, &attribution);
        assert!(recs.iter().all(|r| r.title != "Age-Related Risk Management"));
        assert!(recs.iter().all(|r| r.title != "Treatment Stability"));
    }

    #[test]
    fn test_equal_priorities_keep_generation_order() {
        let features = FeatureVector::from_pairs([("adherence_mean", 85.0)]);
        let recs = RecommendationEngine::new().generate(
            RiskCategory::Medium,
            0.4,
            &features,
            &Attribution::default(),
        );
        assert_eq!(
            titles(&recs),
            vec![
                "Enhanced Monitoring",
                "Adherence Support",
                "Adherence Improvement"
            ]
        );
    }

    #[test]
    fn test_missing_adherence_skips_adherence_rules() {
        let recs = RecommendationEngine::new().generate(
            RiskCategory::High,
            0.9,
            &FeatureVector::default(),
            &Attribution::default(),
        );
        assert!(recs.iter().all(|r| r.category != RecommendationCategory::Adherence));
        assert_eq!(
            titles(&recs),
            vec![
                "Intensive Monitoring",
                "Treatment Review",
                "Comorbidity Management"
            ]
        );
    }

    #[test]
    fn test_high_priority_sorted_before_low() {
        let features = FeatureVector::from_pairs([("smoker", 1.0), ("adherence_mean", 95.0)]);
        let attribution = Attribution::from_pairs([("smoker", 0.5)]);
        let recs =
            RecommendationEngine::new().generate(RiskCategory::Low, 0.3, &features, &attribution);
        assert_eq!(titles(&recs), vec!["Smoking Cessation", "Routine Monitoring"]);
    }
}
