//! Process-wide model handle.
//!
//! The classifier artifact is loaded on first use and shared read-only for
//! the rest of the process. Initialization is serialized by a lock so two
//! racing first callers never both read and verify the artifact.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::adapters::artifact::ArtifactStore;
use crate::adapters::logistic::LogisticClassifier;
use crate::adapters::shapley::ShapleyAttribution;
use crate::config::Settings;
use crate::ports::{AttributionEngine, RiskClassifier};
use crate::PtldError;

static MODEL: OnceLock<SharedModel> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Loaded classifier plus the attribution engine bound to its baseline.
#[derive(Clone)]
pub struct SharedModel {
    pub classifier: Arc<dyn RiskClassifier>,
    pub attribution: Arc<dyn AttributionEngine>,
}

impl SharedModel {
    /// Load and verify the artifact in `store`.
    ///
    /// # Errors
    /// Returns `Artifact` if the artifact is missing, unsigned or invalid.
    pub fn load(store: &ArtifactStore) -> Result<Self, PtldError> {
        tracing::info!("Loading risk model from {}", store.dir().display());
        let classifier = LogisticClassifier::load(store)?;
        let attribution = ShapleyAttribution::new(classifier.baseline());

        let info = classifier.model_info();
        tracing::info!(
            "Risk model {} ready ({} features)",
            info.model_version,
            info.features.len()
        );

        Ok(Self {
            classifier: Arc::new(classifier),
            attribution: Arc::new(attribution),
        })
    }
}

/// Return the process-wide model, loading it on first call.
///
/// Later calls return the same handle without touching `settings`. A failed
/// load leaves the slot empty so a later call can retry.
///
/// # Errors
/// Returns `Config` or `Artifact` if the first load fails.
pub fn shared_model(settings: &Settings) -> Result<&'static SharedModel, PtldError> {
    if let Some(model) = MODEL.get() {
        return Ok(model);
    }

    // A panic while holding the lock cannot leave `()` inconsistent
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(model) = MODEL.get() {
        return Ok(model);
    }

    let model = SharedModel::load(&settings.artifact_store()?)?;
    Ok(MODEL.get_or_init(|| model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::artifact::tests::{sample_spec, write_json};
    use crate::adapters::artifact::MODEL_FILE;
    use crate::domain::FeatureVector;

    #[test]
    fn test_load_binds_attribution_to_baseline() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_json(&temp.path().join(MODEL_FILE), &sample_spec());
        let store = ArtifactStore::new(temp.path()).allow_unsigned(true);

        let model = SharedModel::load(&store).expect("Should load");
        assert_eq!(model.classifier.version(), "v-test");

        // At the baseline every attribution is zero
        let baseline = FeatureVector::from_pairs([("age", 40.0), ("adherence_mean", 85.0)]);
        let attribution = model
            .attribution
            .attribute(&baseline, model.classifier.as_ref())
            .expect("Should attribute");
        assert!(attribution.iter().all(|(_, v)| v.abs() < 1e-12));
    }

    #[test]
    fn test_shared_model_is_loaded_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_json(&temp.path().join(MODEL_FILE), &sample_spec());
        let settings = Settings {
            model_dir: temp.path().to_path_buf(),
            allow_unsigned_models: true,
            ..Settings::default()
        };

        let first = shared_model(&settings).expect("Should load");
        // Removing the artifact does not matter once loaded
        drop(temp);
        let second = shared_model(&settings).expect("Should reuse");
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_missing_artifact_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path()).allow_unsigned(true);
        assert!(matches!(
            SharedModel::load(&store),
            Err(PtldError::Artifact(_))
        ));
    }
}
