use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "inbox-planner.log";
pub const LOG_FILTER_ENV: &str = "INBOX_PLANNER_LOG";

/// Installs a JSON-lines subscriber appending to `logs_dir/inbox-planner.log`.
///
/// The filter comes from `INBOX_PLANNER_LOG` (default `info`). A subscriber
/// that is already installed is left in place.
pub fn init_logging(logs_dir: &Path) -> Result<(), InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE_NAME))?;
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(logs_dir = %logs_dir.display(), "logging initialized");
    }
    Ok(())
}
