//! SQLite adapter: Implementation of `PatientRepository` and `PredictionStore`.
//!
//! Provides local persistence for patient records and prediction history.
//! Patient snapshots are stored as JSON; visits, modifications and
//! predictions get their own tables so history queries stay cheap.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    MonitoringVisit, PatientRecord, PatientSnapshot, PredictionRecord, PredictionResult,
    RiskCategory, TreatmentModification,
};
use crate::ports::{PatientRepository, PredictionStore};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS patients (
                patient_id TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS visits (
                visit_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id) ON DELETE CASCADE,
                date TEXT,
                adherence_pct REAL,
                adverse_reactions TEXT NOT NULL DEFAULT '',
                smear_result TEXT NOT NULL DEFAULT '',
                weight_kg REAL
            );

            CREATE TABLE IF NOT EXISTS modifications (
                modification_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id) ON DELETE CASCADE,
                modified_drug TEXT NOT NULL,
                reason TEXT NOT NULL,
                date TEXT,
                new_dosage_mg INTEGER
            );

            CREATE TABLE IF NOT EXISTS predictions (
                prediction_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id) ON DELETE CASCADE,
                risk_score REAL NOT NULL,
                risk_category TEXT NOT NULL,
                model_version TEXT NOT NULL,
                confidence REAL NOT NULL,
                attribution_json TEXT NOT NULL,
                recommendations_json TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_visits_patient ON visits(patient_id);
            CREATE INDEX IF NOT EXISTS idx_modifications_patient ON modifications(patient_id);
            CREATE INDEX IF NOT EXISTS idx_predictions_patient
                ON predictions(patient_id, timestamp DESC);
            ",
        )?;

        Ok(())
    }

    /// Insert or replace a patient snapshot.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn upsert_patient(&self, snapshot: &PatientSnapshot) -> Result<(), StorageError> {
        write_patient(&*self.conn()?, snapshot)
    }

    /// Record a monitoring visit for an existing patient.
    ///
    /// Re-recording a visit the patient already owns updates it in place.
    ///
    /// # Errors
    /// Returns `Conflict` if the visit id belongs to another patient, or error
    /// if the patient does not exist or storage fails.
    pub fn add_visit(&self, patient_id: &str, visit: &MonitoringVisit) -> Result<(), StorageError> {
        write_visit(&*self.conn()?, patient_id, visit)
    }

    /// Record a treatment modification for an existing patient.
    ///
    /// # Errors
    /// Returns `Conflict` if the modification id belongs to another patient,
    /// or error if the patient does not exist or storage fails.
    pub fn add_modification(
        &self,
        patient_id: &str,
        modification: &TreatmentModification,
    ) -> Result<(), StorageError> {
        write_modification(&*self.conn()?, patient_id, modification)
    }

    /// Store a full record (snapshot, visits, modifications) atomically.
    ///
    /// # Errors
    /// Returns error if any write fails; nothing is stored in that case.
    pub fn save_record(&self, record: &PatientRecord) -> Result<(), StorageError> {
        let id = &record.snapshot.patient_id;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        write_patient(&tx, &record.snapshot)?;
        for visit in &record.visits {
            write_visit(&tx, id, visit)?;
        }
        for modification in &record.modifications {
            write_modification(&tx, id, modification)?;
        }

        tx.commit()?;
        tracing::debug!(
            "Saved record {id} ({} visits, {} modifications)",
            record.visits.len(),
            record.modifications.len()
        );
        Ok(())
    }

    /// Delete a patient and, by cascade, its history.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the patient does not exist.
    pub fn delete_patient(&self, patient_id: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM patients WHERE patient_id = ?1",
            params![patient_id],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(patient_id.to_string()));
        }
        tracing::info!("Deleted patient {patient_id}");
        Ok(())
    }
}

fn write_patient(conn: &Connection, snapshot: &PatientSnapshot) -> Result<(), StorageError> {
    conn.execute(
        r"
        INSERT INTO patients (patient_id, snapshot_json, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(patient_id) DO UPDATE SET
            snapshot_json = excluded.snapshot_json,
            updated_at = excluded.updated_at
        ",
        params![
            snapshot.patient_id,
            serde_json::to_string(snapshot)?,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    tracing::debug!("Saved patient {}", snapshot.patient_id);
    Ok(())
}

// Ids are unique across patients; the upsert only touches rows the patient owns.
fn write_visit(
    conn: &Connection,
    patient_id: &str,
    visit: &MonitoringVisit,
) -> Result<(), StorageError> {
    let changed = conn.execute(
        r"
        INSERT INTO visits (
            visit_id, patient_id, date, adherence_pct,
            adverse_reactions, smear_result, weight_kg
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(visit_id) DO UPDATE SET
            date = excluded.date,
            adherence_pct = excluded.adherence_pct,
            adverse_reactions = excluded.adverse_reactions,
            smear_result = excluded.smear_result,
            weight_kg = excluded.weight_kg
        WHERE visits.patient_id = excluded.patient_id
        ",
        params![
            visit.visit_id,
            patient_id,
            visit.date.map(|d| d.format(DATE_FORMAT).to_string()),
            visit.adherence_pct,
            visit.adverse_reactions,
            visit.smear_result,
            visit.weight_kg,
        ],
    )?;
    if changed == 0 {
        return Err(StorageError::Conflict(format!(
            "visit {} belongs to another patient",
            visit.visit_id
        )));
    }
    Ok(())
}

fn write_modification(
    conn: &Connection,
    patient_id: &str,
    modification: &TreatmentModification,
) -> Result<(), StorageError> {
    let changed = conn.execute(
        r"
        INSERT INTO modifications (
            modification_id, patient_id, modified_drug, reason, date, new_dosage_mg
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(modification_id) DO UPDATE SET
            modified_drug = excluded.modified_drug,
            reason = excluded.reason,
            date = excluded.date,
            new_dosage_mg = excluded.new_dosage_mg
        WHERE modifications.patient_id = excluded.patient_id
        ",
        params![
            modification.modification_id,
            patient_id,
            modification.modified_drug,
            modification.reason,
            modification.date.map(|d| d.format(DATE_FORMAT).to_string()),
            modification.new_dosage_mg,
        ],
    )?;
    if changed == 0 {
        return Err(StorageError::Conflict(format!(
            "modification {} belongs to another patient",
            modification.modification_id
        )));
    }
    Ok(())
}

fn parse_date(value: Option<String>) -> Option<chrono::NaiveDate> {
    value.and_then(|s| chrono::NaiveDate::parse_from_str(&s, DATE_FORMAT).ok())
}

fn json_column_error(index: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

impl PatientRepository for SqliteStorage {
    type Error = StorageError;

    fn load_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>, Self::Error> {
        let conn = self.conn()?;

        let snapshot_json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM patients WHERE patient_id = ?1",
                params![patient_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(snapshot_json) = snapshot_json else {
            return Ok(None);
        };
        let snapshot: PatientSnapshot = serde_json::from_str(&snapshot_json)?;

        let mut stmt = conn.prepare(
            r"
            SELECT visit_id, date, adherence_pct, adverse_reactions, smear_result, weight_kg
            FROM visits WHERE patient_id = ?1
            ORDER BY date, visit_id
            ",
        )?;
        let visits = stmt
            .query_map(params![patient_id], |row| {
                Ok(MonitoringVisit {
                    visit_id: row.get(0)?,
                    date: parse_date(row.get(1)?),
                    adherence_pct: row.get(2)?,
                    adverse_reactions: row.get(3)?,
                    smear_result: row.get(4)?,
                    weight_kg: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r"
            SELECT modification_id, modified_drug, reason, date, new_dosage_mg
            FROM modifications WHERE patient_id = ?1
            ORDER BY date, modification_id
            ",
        )?;
        let modifications = stmt
            .query_map(params![patient_id], |row| {
                Ok(TreatmentModification {
                    modification_id: row.get(0)?,
                    modified_drug: row.get(1)?,
                    reason: row.get(2)?,
                    date: parse_date(row.get(3)?),
                    new_dosage_mg: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PatientRecord {
            snapshot,
            visits,
            modifications,
        }))
    }
}

impl PredictionStore for SqliteStorage {
    type Error = StorageError;

    fn save_prediction(
        &self,
        patient_id: &str,
        result: &PredictionResult,
    ) -> Result<PredictionRecord, Self::Error> {
        let record = PredictionRecord::new(patient_id, result.clone());
        let conn = self.conn()?;

        conn.execute(
            r"
            INSERT INTO predictions (
                prediction_id, patient_id, risk_score, risk_category, model_version,
                confidence, attribution_json, recommendations_json, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                record.prediction_id,
                record.patient_id,
                result.risk_score,
                result.risk_category.as_str(),
                result.model_version,
                result.confidence,
                serde_json::to_string(&result.attribution)?,
                serde_json::to_string(&result.recommendations)?,
                record.timestamp.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Saved prediction {} to storage", record.prediction_id);
        Ok(record)
    }

    fn load_predictions(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, Self::Error> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r"
            SELECT prediction_id, patient_id, risk_score, risk_category, model_version,
                   confidence, attribution_json, recommendations_json, timestamp
            FROM predictions
            WHERE patient_id = ?1
            ORDER BY timestamp DESC
            LIMIT ?2
            ",
        )?;

        let records = stmt
            .query_map(params![patient_id, limit as i64], |row| {
                let risk_category: String = row.get(3)?;
                let attribution_json: String = row.get(6)?;
                let recommendations_json: String = row.get(7)?;
                let timestamp: String = row.get(8)?;

                let risk_category = RiskCategory::parse(&risk_category).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(
                        3,
                        "risk_category".into(),
                        rusqlite::types::Type::Text,
                    )
                })?;
                let attribution = serde_json::from_str(&attribution_json)
                    .map_err(|e| json_column_error(6, e))?;
                let recommendations = serde_json::from_str(&recommendations_json)
                    .map_err(|e| json_column_error(7, e))?;
                let timestamp = chrono::DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            8,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;

                Ok(PredictionRecord {
                    prediction_id: row.get(0)?,
                    patient_id: row.get(1)?,
                    timestamp,
                    result: PredictionResult {
                        risk_score: row.get(2)?,
                        risk_category,
                        attribution,
                        model_version: row.get(4)?,
                        confidence: row.get(5)?,
                        recommendations,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count_predictions(&self) -> Result<usize, Self::Error> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attribution, Priority, Recommendation, RecommendationCategory, Sex};

    fn record() -> PatientRecord {
        let mut snapshot = PatientSnapshot::new("PT-00042", Sex::Female, 63);
        snapshot.comorbidities.diabetes = true;
        let mut record = PatientRecord::new(snapshot);
        record.visits = vec![
            MonitoringVisit::with_adherence("V-001", 82.0),
            MonitoringVisit::with_adherence("V-002", 76.5),
        ];
        record.modifications = vec![TreatmentModification::new("M-001", "RIF", "adverse reaction")];
        record
    }

    #[test]
    fn test_patient_roundtrip() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        assert!(storage.load_patient("PT-00042").expect("Should query").is_none());

        storage.save_record(&record()).expect("Should save");
        let loaded = storage
            .load_patient("PT-00042")
            .expect("Should query")
            .expect("Should exist");

        assert_eq!(loaded.snapshot.age, 63);
        assert!(loaded.snapshot.comorbidities.diabetes);
        assert_eq!(loaded.visits.len(), 2);
        assert_eq!(loaded.modifications.len(), 1);
        assert_eq!(loaded.modifications[0].modified_drug, "RIF");
    }

    #[test]
    fn test_visit_requires_patient() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let visit = MonitoringVisit::with_adherence("V-404", 90.0);
        assert!(storage.add_visit("PT-missing", &visit).is_err());
    }

    #[test]
    fn test_prediction_history() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_record(&record()).expect("Should save");
        assert_eq!(storage.count_predictions().expect("Should count"), 0);

        let result = PredictionResult::new(
            0.3,
            0.7,
            Attribution::from_pairs([("age", 0.4), ("diabetes", 0.2)]),
            "v1.0.0",
        )
        .with_recommendations(vec![Recommendation {
            category: RecommendationCategory::Monitoring,
            priority: Priority::High,
            title: "Intensive Monitoring".into(),
            description: "High risk detected.".into(),
            actions: vec!["Monitor lung function tests".into()],
        }]);

        let saved = storage
            .save_prediction("PT-00042", &result)
            .expect("Should save prediction");
        assert_eq!(storage.count_predictions().expect("Should count"), 1);

        let history = storage
            .load_predictions("PT-00042", 5)
            .expect("Should load history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prediction_id, saved.prediction_id);
        assert_eq!(history[0].result.risk_category, RiskCategory::High);
        assert_eq!(history[0].result.attribution, result.attribution);
        assert_eq!(history[0].result.recommendations, result.recommendations);
    }

    #[test]
    fn test_delete_patient_cascades() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_record(&record()).expect("Should save");
        let result = PredictionResult::new(0.8, 0.2, Attribution::default(), "v1.0.0");
        storage.save_prediction("PT-00042", &result).expect("Should save");

        storage.delete_patient("PT-00042").expect("Should delete");
        assert!(storage.load_patient("PT-00042").expect("Should query").is_none());
        assert_eq!(storage.count_predictions().expect("Should count"), 0);
        assert!(matches!(
            storage.delete_patient("PT-00042"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_shared_visit_id_rejected_without_partial_import() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_record(&record()).expect("Should save");

        let mut other = PatientRecord::new(PatientSnapshot::new("PT-00043", Sex::Male, 38));
        other.visits = vec![MonitoringVisit::with_adherence("V-001", 99.0)];
        assert!(matches!(
            storage.save_record(&other),
            Err(StorageError::Conflict(_))
        ));

        // First patient keeps its visit untouched
        let loaded = storage
            .load_patient("PT-00042")
            .expect("Should query")
            .expect("Should exist");
        let v1 = loaded
            .visits
            .iter()
            .find(|v| v.visit_id == "V-001")
            .expect("Visit kept");
        assert_eq!(v1.adherence_pct, Some(82.0));
        assert_eq!(loaded.visits.len(), 2);

        // The failed import rolled back its snapshot too
        assert!(storage.load_patient("PT-00043").expect("Should query").is_none());
    }

    #[test]
    fn test_reimport_updates_own_visits() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_record(&record()).expect("Should save");

        let mut updated = record();
        updated.visits[0].adherence_pct = Some(88.0);
        storage.save_record(&updated).expect("Should re-import");

        let loaded = storage
            .load_patient("PT-00042")
            .expect("Should query")
            .expect("Should exist");
        assert_eq!(loaded.visits.len(), 2);
        assert!(loaded
            .visits
            .iter()
            .any(|v| v.visit_id == "V-001" && v.adherence_pct == Some(88.0)));
    }

    #[test]
    fn test_shared_modification_id_rejected() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_record(&record()).expect("Should save");
        storage
            .upsert_patient(&PatientSnapshot::new("PT-00043", Sex::Male, 38))
            .expect("Should save");

        let modification = TreatmentModification::new("M-001", "INH", "hepatotoxicity");
        assert!(matches!(
            storage.add_modification("PT-00043", &modification),
            Err(StorageError::Conflict(_))
        ));
    }
}
