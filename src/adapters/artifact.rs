//! Model artifact store: versioned model files on disk.
//!
//! An artifact directory holds:
//! - `model.json`: classifier parameters (see `LogisticModelSpec`)
//! - `model_metadata.json`: version, feature schema and training metrics
//! - `manifest.json`: SHA-256 digests of the files above
//! - `model.sig`: Ed25519 signature over the raw bytes of `manifest.json`
//!
//! # Security
//!
//! - Every file named by the manifest is hashed and compared before loading
//! - The manifest signature is checked against the configured verifying key
//! - Unsigned artifacts are refused unless explicitly allowed, and the
//!   allowance is only honored in debug builds

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ports::ModelInfo;

pub const MODEL_FILE: &str = "model.json";
pub const METADATA_FILE: &str = "model_metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "model.sig";

/// Only manifest format understood by this loader.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors raised while reading or verifying a model artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {file}: {message}")]
    Format { file: &'static str, message: String },

    #[error("Artifact is not signed: {0}")]
    Unsigned(String),

    #[error("Invalid model signature")]
    BadSignature,

    #[error("Invalid verifying key: {0}")]
    BadVerifyingKey(String),

    #[error("File hash mismatch for {0}")]
    HashMismatch(String),

    #[error("Inconsistent artifact: {0}")]
    Inconsistent(String),
}

/// Isotonic calibration table: monotone breakpoints mapping raw to calibrated probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Parameters of a standardized logistic-regression classifier, as exported
/// by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModelSpec {
    pub model_version: String,
    pub feature_cols: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub scaler_mean: Vec<f64>,
    pub scaler_scale: Vec<f64>,
    #[serde(default)]
    pub calibration: Option<CalibrationTable>,
    /// Expected feature values used as the attribution baseline.
    /// Defaults to `scaler_mean`.
    #[serde(default)]
    pub baseline: Option<Vec<f64>>,
}

/// Training metadata exported alongside the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub feature_cols: Vec<String>,
    pub model_version: String,
    #[serde(default)]
    pub training_date: Option<String>,
    #[serde(default)]
    pub performance: BTreeMap<String, serde_json::Value>,
}

impl ModelMetadata {
    /// Numeric performance metrics only; labels such as `best_model` are dropped.
    #[must_use]
    pub fn into_model_info(self) -> ModelInfo {
        let performance = self
            .performance
            .into_iter()
            .filter_map(|(k, v)| v.as_f64().map(|f| (k, f)))
            .collect();
        ModelInfo {
            model_version: self.model_version,
            features: self.feature_cols,
            training_date: self.training_date,
            performance,
        }
    }
}

/// Signed manifest binding artifact files by SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: u32,
    /// Monotonic serial, typically the CI build number
    pub serial: u64,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub files: BTreeMap<String, String>,
}

/// A verified, parsed artifact directory.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub model: LogisticModelSpec,
    pub metadata: Option<ModelMetadata>,
    pub manifest: Option<ModelManifest>,
}

/// Reads and verifies model artifacts from one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    verifying_key: Option<VerifyingKey>,
    allow_unsigned: bool,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            verifying_key: None,
            allow_unsigned: false,
        }
    }

    #[must_use]
    pub fn with_verifying_key(mut self, key: VerifyingKey) -> Self {
        self.verifying_key = Some(key);
        self
    }

    /// Permit artifacts without a valid signature. Ignored in release builds.
    #[must_use]
    pub fn allow_unsigned(mut self, allow: bool) -> Self {
        self.allow_unsigned = allow;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unsigned_allowed(&self) -> bool {
        cfg!(debug_assertions) && self.allow_unsigned
    }

    /// Verify and parse the artifact.
    ///
    /// # Errors
    /// Returns `ArtifactError` if files are missing, malformed, tampered with,
    /// or unsigned without an explicit allowance.
    pub fn load(&self) -> Result<LoadedArtifact, ArtifactError> {
        let manifest = self.verify()?;

        let model: LogisticModelSpec = read_json(&self.dir.join(MODEL_FILE), MODEL_FILE)?;

        let metadata_path = self.dir.join(METADATA_FILE);
        let metadata: Option<ModelMetadata> = if metadata_path.exists() {
            Some(read_json(&metadata_path, METADATA_FILE)?)
        } else {
            None
        };

        if let Some(meta) = &metadata {
            if meta.model_version != model.model_version {
                return Err(ArtifactError::Inconsistent(format!(
                    "metadata version {} does not match model version {}",
                    meta.model_version, model.model_version
                )));
            }
            if meta.feature_cols != model.feature_cols {
                return Err(ArtifactError::Inconsistent(
                    "metadata feature_cols differ from model feature_cols".into(),
                ));
            }
        }

        tracing::info!(
            "Loaded model artifact {} from {:?} ({} features)",
            model.model_version,
            self.dir,
            model.feature_cols.len()
        );

        Ok(LoadedArtifact {
            model,
            metadata,
            manifest,
        })
    }

    /// Check the manifest signature and file digests.
    ///
    /// Returns `None` only when an unsigned artifact was explicitly allowed.
    fn verify(&self) -> Result<Option<ModelManifest>, ArtifactError> {
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let sig_path = self.dir.join(SIGNATURE_FILE);

        if !manifest_path.exists() {
            return self.unsigned(format!("{MANIFEST_FILE} not found in {:?}", self.dir));
        }

        let manifest_bytes = read_bytes(&manifest_path)?;

        match (&self.verifying_key, sig_path.exists()) {
            (Some(key), true) => {
                let sig_bytes = read_bytes(&sig_path)?;
                let sig_array: [u8; 64] = sig_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ArtifactError::Format {
                        file: SIGNATURE_FILE,
                        message: "expected 64 bytes".into(),
                    })?;
                let signature = Signature::from_bytes(&sig_array);
                key.verify(&manifest_bytes, &signature)
                    .map_err(|_| ArtifactError::BadSignature)?;
                tracing::debug!("Model manifest signature verified");
            }
            (None, true) => {
                self.unsigned("no verifying key configured".to_string())?;
            }
            (_, false) => {
                self.unsigned(format!("{SIGNATURE_FILE} not found"))?;
            }
        }

        let manifest: ModelManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| ArtifactError::Format {
                file: MANIFEST_FILE,
                message: e.to_string(),
            })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(ArtifactError::Format {
                file: MANIFEST_FILE,
                message: format!("unsupported manifest version {}", manifest.version),
            });
        }
        if !manifest.files.contains_key(MODEL_FILE) {
            return Err(ArtifactError::Format {
                file: MANIFEST_FILE,
                message: format!("manifest must bind {MODEL_FILE}"),
            });
        }
        if self.dir.join(METADATA_FILE).exists() && !manifest.files.contains_key(METADATA_FILE) {
            return Err(ArtifactError::Format {
                file: MANIFEST_FILE,
                message: format!("{METADATA_FILE} is present but not bound by the manifest"),
            });
        }

        for (rel, expected_hex) in &manifest.files {
            if rel.contains("..") || Path::new(rel).is_absolute() {
                return Err(ArtifactError::Format {
                    file: MANIFEST_FILE,
                    message: format!("illegal path {rel}"),
                });
            }
            let actual_hex = sha256_hex(&read_bytes(&self.dir.join(rel))?);
            if !constant_time_eq_str(&actual_hex, expected_hex) {
                return Err(ArtifactError::HashMismatch(rel.clone()));
            }
        }

        tracing::info!(
            "Model manifest verified (serial={}, {} files)",
            manifest.serial,
            manifest.files.len()
        );
        Ok(Some(manifest))
    }

    fn unsigned(&self, reason: String) -> Result<Option<ModelManifest>, ArtifactError> {
        if self.unsigned_allowed() {
            tracing::warn!("Loading UNSIGNED model artifact ({reason}); debug builds only");
            Ok(None)
        } else {
            tracing::error!("Refusing unsigned model artifact: {reason}");
            Err(ArtifactError::Unsigned(reason))
        }
    }
}

/// Decode a base64 Ed25519 verifying key.
///
/// # Errors
/// Returns `ArtifactError::BadVerifyingKey` if the key is malformed.
pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, ArtifactError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| ArtifactError::BadVerifyingKey(format!("base64: {e}")))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ArtifactError::BadVerifyingKey("expected 32 bytes".into()))?;
    VerifyingKey::from_bytes(&array).map_err(|e| ArtifactError::BadVerifyingKey(e.to_string()))
}

/// Lowercase hex SHA-256 digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    file: &'static str,
) -> Result<T, ArtifactError> {
    let bytes = read_bytes(path)?;
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Format {
        file,
        message: e.to_string(),
    })
}

// Constant-time compare for ASCII strings (used for SHA-256 hex digests).
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::RngCore;
    use tempfile::tempdir;

    pub(crate) fn sample_spec() -> LogisticModelSpec {
        LogisticModelSpec {
            model_version: "v-test".into(),
            feature_cols: vec!["age".into(), "adherence_mean".into()],
            coefficients: vec![0.8, -1.2],
            intercept: -0.5,
            scaler_mean: vec![40.0, 85.0],
            scaler_scale: vec![15.0, 8.0],
            calibration: None,
            baseline: None,
        }
    }

    pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Vec<u8> {
        let bytes = serde_json::to_vec_pretty(value).expect("serialize");
        fs::write(path, &bytes).expect("write");
        bytes
    }

    pub(crate) fn write_manifest(dir: &Path, files: &[(&str, &[u8])]) -> Vec<u8> {
        let manifest = ModelManifest {
            version: MANIFEST_VERSION,
            serial: 1,
            created_at: 1_700_000_000,
            files: files
                .iter()
                .map(|(name, bytes)| ((*name).to_string(), sha256_hex(bytes)))
                .collect(),
        };
        write_json(&dir.join(MANIFEST_FILE), &manifest)
    }

    fn signing_key() -> SigningKey {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        SigningKey::from_bytes(&seed)
    }

    #[test]
    fn test_signed_artifact_loads() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        let model_bytes = write_json(&dir.join(MODEL_FILE), &sample_spec());
        let manifest_bytes = write_manifest(dir, &[(MODEL_FILE, &model_bytes)]);

        let key = signing_key();
        let sig: Signature = key.sign(&manifest_bytes);
        fs::write(dir.join(SIGNATURE_FILE), sig.to_bytes()).expect("write sig");

        let artifact = ArtifactStore::new(dir)
            .with_verifying_key(key.verifying_key())
            .load()
            .expect("Should load signed artifact");
        assert_eq!(artifact.model.model_version, "v-test");
        assert!(artifact.manifest.is_some());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        let model_bytes = write_json(&dir.join(MODEL_FILE), &sample_spec());
        let manifest_bytes = write_manifest(dir, &[(MODEL_FILE, &model_bytes)]);
        let sig: Signature = signing_key().sign(&manifest_bytes);
        fs::write(dir.join(SIGNATURE_FILE), sig.to_bytes()).expect("write sig");

        let err = ArtifactStore::new(dir)
            .with_verifying_key(signing_key().verifying_key())
            .load()
            .unwrap_err();
        assert!(matches!(err, ArtifactError::BadSignature));
    }

    #[test]
    fn test_tampered_model_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        let model_bytes = write_json(&dir.join(MODEL_FILE), &sample_spec());
        write_manifest(dir, &[(MODEL_FILE, &model_bytes)]);

        let mut tampered = sample_spec();
        tampered.intercept = 3.0;
        write_json(&dir.join(MODEL_FILE), &tampered);

        let err = ArtifactStore::new(dir)
            .allow_unsigned(true)
            .load()
            .unwrap_err();
        assert!(matches!(err, ArtifactError::HashMismatch(ref f) if f == MODEL_FILE));
    }

    #[test]
    fn test_unsigned_refused_by_default() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        write_json(&dir.join(MODEL_FILE), &sample_spec());

        let err = ArtifactStore::new(dir).load().unwrap_err();
        assert!(matches!(err, ArtifactError::Unsigned(_)));

        let artifact = ArtifactStore::new(dir)
            .allow_unsigned(true)
            .load()
            .expect("Debug builds accept explicit allowance");
        assert!(artifact.manifest.is_none());
    }

    #[test]
    fn test_metadata_must_agree_with_model() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path();
        write_json(&dir.join(MODEL_FILE), &sample_spec());
        let metadata = ModelMetadata {
            feature_cols: vec!["age".into()],
            model_version: "v-test".into(),
            training_date: None,
            performance: BTreeMap::new(),
        };
        write_json(&dir.join(METADATA_FILE), &metadata);

        let err = ArtifactStore::new(dir)
            .allow_unsigned(true)
            .load()
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Inconsistent(_)));
    }

    #[test]
    fn test_metadata_numeric_performance_only() {
        let mut performance = BTreeMap::new();
        performance.insert("xgb_test_auroc".to_string(), serde_json::json!(0.81));
        performance.insert("best_model".to_string(), serde_json::json!("XGBoost"));
        let info = ModelMetadata {
            feature_cols: vec!["age".into()],
            model_version: "v1.0.0".into(),
            training_date: Some("2025-01-01T00:00:00".into()),
            performance,
        }
        .into_model_info();

        assert_eq!(info.performance.len(), 1);
        assert_eq!(info.performance.get("xgb_test_auroc"), Some(&0.81));
    }

    #[test]
    fn test_verifying_key_from_b64() {
        let key = signing_key().verifying_key();
        let b64 = base64::engine::general_purpose::STANDARD.encode(key.to_bytes());
        assert_eq!(verifying_key_from_b64(&b64).expect("valid"), key);
        assert!(verifying_key_from_b64("AAAA").is_err());
    }
}
