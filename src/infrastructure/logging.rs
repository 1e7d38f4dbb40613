use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const ENGINE_LOG: &str = "engine.log";

/// Installs a JSON subscriber appending to `logs/engine.log`. Returns false
/// when a global subscriber is already installed.
pub fn init_logging(logs_dir: &Path, filter: &str) -> Result<bool, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(logs_dir))?;
    let filter = EnvFilter::try_new(filter)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid logFilter '{filter}': {error}")))?;

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok();
    Ok(installed)
}

pub fn log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(ENGINE_LOG)
}
