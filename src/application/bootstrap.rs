use crate::infrastructure::config::{ensure_default_configs, validate_configs};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE_NAME: &str = "inbox-planner.sqlite";

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

/// Lays out `config/`, `state/` and `logs/` under the workspace root, writes
/// missing default configs, and migrates the database.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE_NAME);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    validate_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_layout_and_rejects_bad_schema() {
        let root = std::env::temp_dir().join(format!("inbox-planner-bootstrap-{}", std::process::id()));
        let result = bootstrap_workspace(&root).expect("bootstrap");
        assert!(result.database_path.exists());
        assert!(result.config_dir.join("app.json").exists());
        assert!(result.logs_dir.is_dir());

        // Idempotent on an existing workspace.
        bootstrap_workspace(&root).expect("second bootstrap");

        fs::write(result.config_dir.join("gmail.json"), "{\"schema\": 2}").expect("write config");
        assert!(matches!(
            bootstrap_workspace(&root),
            Err(InfraError::InvalidConfig(_))
        ));
        let _ = fs::remove_dir_all(&root);
    }
}
