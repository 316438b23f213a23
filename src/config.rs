//! Runtime configuration read from `PTLD_*` environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `PTLD_MODEL_DIR` | `models` |
//! | `PTLD_DB_PATH` | `data/ptld.db` |
//! | `PTLD_LOG_MODE` | `auto` (`file` \| `stderr` \| `auto`) |
//! | `PTLD_LOG_FILE` | `data/ptld.log` |
//! | `PTLD_ALLOW_UNSIGNED_MODELS` | `false`, honored in debug builds only |
//! | `PTLD_MODEL_PUBKEY_B64_FILE` | unset |

use std::fs;
use std::path::PathBuf;

use ed25519_dalek::VerifyingKey;

use crate::adapters::artifact::{verifying_key_from_b64, ArtifactStore};

pub const MODEL_DIR_ENV: &str = "PTLD_MODEL_DIR";
pub const DB_PATH_ENV: &str = "PTLD_DB_PATH";
pub const LOG_MODE_ENV: &str = "PTLD_LOG_MODE";
pub const LOG_FILE_ENV: &str = "PTLD_LOG_FILE";
pub const ALLOW_UNSIGNED_ENV: &str = "PTLD_ALLOW_UNSIGNED_MODELS";
pub const PUBKEY_FILE_ENV: &str = "PTLD_MODEL_PUBKEY_B64_FILE";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Failed reading verifying key file {path}: {message}")]
    VerifyingKey { path: PathBuf, message: String },
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    File,
    /// Stderr, leaving stdout to command output. `stdout` is accepted as an alias.
    Stderr,
    /// File when stdout is a terminal, stderr otherwise
    Auto,
}

impl LogMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "stderr" | "stdout" => Some(Self::Stderr),
            "auto" | "" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Resolve `Auto` against whether stdout is interactive.
    #[must_use]
    pub fn use_file(self, interactive: bool) -> bool {
        match self {
            Self::File => true,
            Self::Stderr => false,
            Self::Auto => interactive,
        }
    }
}

/// Process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
    pub allow_unsigned_models: bool,
    pub pubkey_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            db_path: PathBuf::from("data/ptld.db"),
            log_mode: LogMode::Auto,
            log_file: PathBuf::from("data/ptld.log"),
            allow_unsigned_models: false,
            pubkey_file: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an unknown log mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an unknown log mode.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let path = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };

        let log_mode = match lookup(LOG_MODE_ENV) {
            Some(value) => LogMode::parse(&value).ok_or(ConfigError::InvalidValue {
                name: LOG_MODE_ENV,
                value,
            })?,
            None => defaults.log_mode,
        };

        Ok(Self {
            model_dir: path(MODEL_DIR_ENV).unwrap_or(defaults.model_dir),
            db_path: path(DB_PATH_ENV).unwrap_or(defaults.db_path),
            log_mode,
            log_file: path(LOG_FILE_ENV).unwrap_or(defaults.log_file),
            allow_unsigned_models: lookup(ALLOW_UNSIGNED_ENV).is_some_and(|v| parse_bool(&v)),
            pubkey_file: path(PUBKEY_FILE_ENV),
        })
    }

    /// Load the model verifying key, if a key file is configured.
    ///
    /// # Errors
    /// Returns `ConfigError::VerifyingKey` if the file is unreadable or malformed.
    pub fn verifying_key(&self) -> Result<Option<VerifyingKey>, ConfigError> {
        let Some(path) = &self.pubkey_file else {
            return Ok(None);
        };
        let error = |message: String| ConfigError::VerifyingKey {
            path: path.clone(),
            message,
        };
        let b64 = fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
        verifying_key_from_b64(&b64)
            .map(Some)
            .map_err(|e| error(e.to_string()))
    }

    /// Artifact store for the configured model directory and key.
    ///
    /// # Errors
    /// Returns error if the verifying key cannot be loaded.
    pub fn artifact_store(&self) -> Result<ArtifactStore, ConfigError> {
        let mut store =
            ArtifactStore::new(self.model_dir.clone()).allow_unsigned(self.allow_unsigned_models);
        if let Some(key) = self.verifying_key()? {
            store = store.with_verifying_key(key);
        }
        Ok(store)
    }
}

/// Accepts `1`, `true` and `yes` (case-insensitive).
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).expect("Should parse");
        assert_eq!(settings.model_dir, PathBuf::from("models"));
        assert_eq!(settings.db_path, PathBuf::from("data/ptld.db"));
        assert_eq!(settings.log_mode, LogMode::Auto);
        assert!(!settings.allow_unsigned_models);
        assert!(settings.pubkey_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            (MODEL_DIR_ENV, "/srv/models"),
            (DB_PATH_ENV, " /srv/ptld.db "),
            (LOG_MODE_ENV, "STDOUT"),
            (ALLOW_UNSIGNED_ENV, "yes"),
            (PUBKEY_FILE_ENV, ""),
        ]))
        .expect("Should parse");
        assert_eq!(settings.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(settings.db_path, PathBuf::from("/srv/ptld.db"));
        assert_eq!(settings.log_mode, LogMode::Stderr);
        assert!(settings.allow_unsigned_models);
        assert!(settings.pubkey_file.is_none());
    }

    #[test]
    fn test_stderr_log_mode() {
        let settings =
            Settings::from_lookup(lookup(&[(LOG_MODE_ENV, "stderr")])).expect("Should parse");
        assert_eq!(settings.log_mode, LogMode::Stderr);
        assert!(!settings.log_mode.use_file(true));
    }

    #[test]
    fn test_invalid_log_mode() {
        let err = Settings::from_lookup(lookup(&[(LOG_MODE_ENV, "syslog")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: LOG_MODE_ENV, .. }));
    }

    #[test]
    fn test_parse_bool() {
        for v in ["1", "true", "TRUE", "yes", " Yes "] {
            assert!(parse_bool(v), "{v}");
        }
        for v in ["0", "false", "no", "", "on"] {
            assert!(!parse_bool(v), "{v}");
        }
    }

    #[test]
    fn test_log_mode_resolution() {
        assert!(LogMode::File.use_file(false));
        assert!(!LogMode::Stderr.use_file(true));
        assert!(LogMode::Auto.use_file(true));
        assert!(!LogMode::Auto.use_file(false));
    }

    #[test]
    fn test_verifying_key_file() {
        use base64::Engine as _;
        use ed25519_dalek::SigningKey;

        let dir = tempfile::tempdir().expect("tempdir");
        let key = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        let path = dir.path().join("pubkey.b64");
        fs::write(
            &path,
            base64::engine::general_purpose::STANDARD.encode(key.as_bytes()),
        )
        .expect("write");

        let settings = Settings {
            pubkey_file: Some(path),
            ..Settings::default()
        };
        assert_eq!(settings.verifying_key().expect("Should load"), Some(key));

        let missing = Settings {
            pubkey_file: Some(dir.path().join("absent")),
            ..Settings::default()
        };
        assert!(matches!(
            missing.verifying_key(),
            Err(ConfigError::VerifyingKey { .. })
        ));
    }
}
