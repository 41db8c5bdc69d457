use crate::domain::response_parser::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Gmail API error: {0}")]
    Gmail(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Google authentication required: {0}")]
    AuthenticationRequired(String),
}

/// Failures on the language-model path. The orchestrator recovers from all
/// of them, so they never reach callers of `analyze`.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("language model backend is unavailable")]
    BackendUnavailable,
    #[error("language model call failed: {0}")]
    BackendCall(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
