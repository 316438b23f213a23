//! Patient record types for PTLD risk prediction.
//!
//! A `PatientRecord` is what the surrounding record-management system hands to
//! the pipeline: the patient snapshot plus its monitoring visits and treatment
//! modifications.

use serde::{Deserialize, Serialize};

/// Number of monthly bacilloscopy results tracked during treatment.
pub const BACILLOSCOPY_MONTHS: usize = 6;

/// Biological sex as recorded at TB notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

/// Final treatment outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Cured,
    Completed,
    Failed,
    Lost,
    Died,
    Transferred,
}

/// Comorbidity flags recorded for a patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comorbidities {
    pub hiv_positive: bool,
    pub diabetes: bool,
    pub smoker: bool,
    pub aids: bool,
    pub alcoholism: bool,
    pub mental_disorder: bool,
    pub drug_addiction: bool,
    /// Free-text "other comorbidity" field. Empty means none.
    #[serde(default)]
    pub other: String,
}

impl Comorbidities {
    /// Number of comorbidities: every set flag plus one for a non-empty `other`.
    #[must_use]
    pub fn count(&self) -> u32 {
        let flags = [
            self.hiv_positive,
            self.diabetes,
            self.smoker,
            self.aids,
            self.alcoholism,
            self.mental_disorder,
            self.drug_addiction,
        ];
        let set = flags.iter().filter(|&&flag| flag).count() as u32;
        set + u32::from(!self.other.is_empty())
    }
}

/// Immutable view of one patient's demographic and clinical attributes at
/// prediction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSnapshot {
    /// Record-system identifier (e.g. `PT-00042`)
    pub patient_id: String,

    pub sex: Sex,

    /// Age in whole years
    pub age: u32,

    #[serde(default)]
    pub comorbidities: Comorbidities,

    /// Bacilloscopy result strings for treatment months 1-6 (blank when not taken)
    #[serde(default)]
    pub bacilloscopy_monthly: [String; BACILLOSCOPY_MONTHS],

    /// Total days in treatment, when known
    #[serde(default)]
    pub days_in_treatment: Option<u32>,

    #[serde(default)]
    pub outcome: Option<OutcomeStatus>,
}

impl PatientSnapshot {
    /// Create a snapshot with no comorbidities and no lab history.
    #[must_use]
    pub fn new(patient_id: impl Into<String>, sex: Sex, age: u32) -> Self {
        Self {
            patient_id: patient_id.into(),
            sex,
            age,
            comorbidities: Comorbidities::default(),
            bacilloscopy_monthly: Default::default(),
            days_in_treatment: None,
            outcome: None,
        }
    }

    /// Bacilloscopy result for a treatment month (1-based), if recorded.
    #[must_use]
    pub fn bacilloscopy_month(&self, month: usize) -> Option<&str> {
        if month == 0 {
            return None;
        }
        self.bacilloscopy_monthly
            .get(month - 1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// One monitoring visit during treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringVisit {
    pub visit_id: String,
    #[serde(default)]
    pub date: Option<chrono::NaiveDate>,
    /// Observed adherence to prescribed doses, percent (0-100)
    #[serde(default)]
    pub adherence_pct: Option<f64>,
    #[serde(default)]
    pub adverse_reactions: String,
    #[serde(default)]
    pub smear_result: String,
    #[serde(default)]
    pub weight_kg: Option<f64>,
}

impl MonitoringVisit {
    /// Visit with only an adherence observation.
    #[must_use]
    pub fn with_adherence(visit_id: impl Into<String>, adherence_pct: f64) -> Self {
        Self {
            visit_id: visit_id.into(),
            date: None,
            adherence_pct: Some(adherence_pct),
            adverse_reactions: String::new(),
            smear_result: String::new(),
            weight_kg: None,
        }
    }
}

/// A change to a patient's treatment regimen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentModification {
    pub modification_id: String,
    pub modified_drug: String,
    pub reason: String,
    #[serde(default)]
    pub date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub new_dosage_mg: Option<u32>,
}

impl TreatmentModification {
    #[must_use]
    pub fn new(
        modification_id: impl Into<String>,
        modified_drug: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            modification_id: modification_id.into(),
            modified_drug: modified_drug.into(),
            reason: reason.into(),
            date: None,
            new_dosage_mg: None,
        }
    }
}

/// Everything the pipeline needs about one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub snapshot: PatientSnapshot,
    #[serde(default)]
    pub visits: Vec<MonitoringVisit>,
    #[serde(default)]
    pub modifications: Vec<TreatmentModification>,
}

impl PatientRecord {
    #[must_use]
    pub fn new(snapshot: PatientSnapshot) -> Self {
        Self {
            snapshot,
            visits: Vec::new(),
            modifications: Vec::new(),
        }
    }
}
