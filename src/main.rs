//! PTLD Guard: Post-tuberculosis lung disease risk assessment.
//!
//! Command-line entry point.
//!
//! ```text
//! ptld-assess import <record.json>        store a patient record
//! ptld-assess assess <patient_id>         score, explain, recommend, persist
//! ptld-assess history <patient_id> [n]    last n stored predictions
//! ptld-assess model-info                  loaded model metadata
//! ```
//!
//! Results are printed to stdout as JSON; logs go to a file or stderr per
//! `PTLD_LOG_MODE`.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ptld_guard::adapters::sanitize::SanitizingMakeWriter;
use ptld_guard::adapters::sqlite::SqliteStorage;
use ptld_guard::application::{shared_model, RiskAssessmentService};
use ptld_guard::config::Settings;
use ptld_guard::domain::PatientRecord;
use ptld_guard::ports::PredictionStore;

const DEFAULT_HISTORY_LIMIT: usize = 10;

enum Command {
    Import(PathBuf),
    Assess(String),
    History(String, usize),
    ModelInfo,
}

fn usage() -> anyhow::Error {
    anyhow!(
        "Usage: ptld-assess <import <record.json> | assess <patient_id> | history <patient_id> [limit] | model-info>"
    )
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["import", path] => Ok(Command::Import(PathBuf::from(*path))),
        ["assess", id] => Ok(Command::Assess((*id).to_string())),
        ["history", id] => Ok(Command::History((*id).to_string(), DEFAULT_HISTORY_LIMIT)),
        ["history", id, limit] => {
            let limit = limit.parse::<usize>().context("history limit must be a number")?;
            Ok(Command::History((*id).to_string(), limit))
        }
        ["model-info"] => Ok(Command::ModelInfo),
        _ => Err(usage()),
    }
}

fn open_storage(path: &Path) -> Result<Arc<SqliteStorage>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let storage = SqliteStorage::new(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    let command = parse_args()?;

    // stdout carries the JSON result; logs go to a file or stderr
    let interactive = std::io::stdout().is_terminal();
    let (writer, _guard) = if settings.log_mode.use_file(interactive) {
        if let Some(parent) = settings.log_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.log_file)
            .with_context(|| format!("Failed to open log file {}", settings.log_file.display()))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    tracing::info!("Starting PTLD Guard...");
    let storage = open_storage(&settings.db_path)?;

    match command {
        Command::Import(path) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: PatientRecord =
                serde_json::from_slice(&bytes).context("Invalid patient record JSON")?;
            storage.save_record(&record)?;
            tracing::info!(
                "Imported patient {} ({} visits, {} modifications)",
                record.snapshot.patient_id,
                record.visits.len(),
                record.modifications.len()
            );
        }
        Command::Assess(patient_id) => {
            let model = shared_model(&settings)?;
            let service =
                RiskAssessmentService::with_model(Arc::clone(&storage), storage, model);
            match service.assess(&patient_id) {
                Ok(record) => print_json(&record)?,
                Err(e) if e.is_client_error() => {
                    tracing::warn!("Assessment rejected: {e}");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!("Assessment failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Command::History(patient_id, limit) => {
            print_json(&storage.load_predictions(&patient_id, limit)?)?;
        }
        Command::ModelInfo => {
            let model = shared_model(&settings)?;
            print_json(&model.classifier.model_info())?;
        }
    }

    tracing::info!("PTLD Guard done.");
    Ok(())
}
