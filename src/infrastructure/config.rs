use crate::domain::datetime::UnparsedDatePolicy;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const EXTRACTION_JSON: &str = "extraction.json";
const GMAIL_JSON: &str = "gmail.json";
const DEFAULT_USER_ID: &str = "default";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_GMAIL_QUERY: &str = "in:inbox";
pub const DEFAULT_MAX_BODY_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub user_id: String,
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionSettings {
    pub model: String,
    pub api_key_env: String,
    pub endpoint: String,
    pub request_timeout_seconds: Option<u64>,
    pub unparsed_date_policy: UnparsedDatePolicy,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            request_timeout_seconds: None,
            unparsed_date_policy: UnparsedDatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GmailSettings {
    pub query: String,
    pub max_results: u32,
    pub max_body_chars: usize,
}

impl Default for GmailSettings {
    fn default() -> Self {
        Self {
            query: DEFAULT_GMAIL_QUERY.to_string(),
            max_results: 10,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "InboxPlanner",
                "userId": DEFAULT_USER_ID,
                "timezone": "UTC"
            }),
        ),
        (
            EXTRACTION_JSON,
            serde_json::json!({
                "schema": 1,
                "model": DEFAULT_GEMINI_MODEL,
                "apiKeyEnv": DEFAULT_API_KEY_ENV,
                "endpoint": DEFAULT_GEMINI_ENDPOINT,
                "requestTimeoutSeconds": null,
                "unparsedDatePolicy": "absent"
            }),
        ),
        (
            GMAIL_JSON,
            serde_json::json!({
                "schema": 1,
                "query": DEFAULT_GMAIL_QUERY,
                "maxResults": 10,
                "maxBodyChars": DEFAULT_MAX_BODY_CHARS
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Reads every config file once so a broken workspace fails at startup.
pub fn validate_configs(config_dir: &Path) -> Result<(), InfraError> {
    read_app_settings(config_dir)?;
    read_extraction_settings(config_dir)?;
    read_gmail_settings(config_dir)?;
    Ok(())
}

pub fn read_app_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let user_id = app
        .get("userId")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_USER_ID)
        .to_string();
    let timezone = match app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{name}' in {APP_JSON}: {error}"))
        })?,
        None => Tz::UTC,
    };
    Ok(AppSettings { user_id, timezone })
}

pub fn read_extraction_settings(config_dir: &Path) -> Result<ExtractionSettings, InfraError> {
    let path = config_dir.join(EXTRACTION_JSON);
    let value = read_config(&path)?;
    let settings: ExtractionSettings = serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    if settings.model.trim().is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "model must not be empty in {}",
            path.display()
        )));
    }
    Ok(settings)
}

pub fn read_gmail_settings(config_dir: &Path) -> Result<GmailSettings, InfraError> {
    let path = config_dir.join(GMAIL_JSON);
    let value = read_config(&path)?;
    let settings: GmailSettings = serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    if settings.max_body_chars == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "maxBodyChars must be positive in {}",
            path.display()
        )));
    }
    Ok(settings)
}
