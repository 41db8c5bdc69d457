use crate::application::bootstrap::bootstrap_workspace;
use crate::application::email_analysis::{AnalysisReport, BatchAnalysisSummary, EmailAnalysisService};
use crate::application::extraction::{ExtractionConfig, ExtractionMode, ExtractionOrchestrator};
use crate::application::oauth::{default_gmail_scopes, EnsureTokenResult, OAuthConfig, OAuthManager};
use crate::domain::models::{
    AnalysisHistoryEntry, AnalysisResult, CalendarEntry, ExtractionRequest, StoredEventCandidate,
    StoredTaskCandidate, Todo,
};
use crate::infrastructure::analysis_history_repository::{
    AnalysisHistoryRepository, SqliteAnalysisHistoryRepository,
};
use crate::infrastructure::candidate_repository::{CandidateRepository, SqliteCandidateRepository};
use crate::infrastructure::config::{
    read_app_settings, read_extraction_settings, read_gmail_settings, AppSettings, GmailSettings,
    DEFAULT_API_KEY_ENV,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::gmail_client::{MailProvider, ReqwestGmailClient};
use crate::infrastructure::oauth_client::{OAuthHttpClient, ReqwestOAuthClient};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
const DEFAULT_CANDIDATE_LIST_LIMIT: u32 = 50;
const DEFAULT_HISTORY_LIST_LIMIT: u32 = 50;

pub type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
pub type CredentialStoreFactory = Arc<dyn Fn(&str) -> Arc<dyn CredentialStore> + Send + Sync>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: AppSettings,
    gmail_settings: GmailSettings,
    lookup: Lookup,
    orchestrator: Arc<ExtractionOrchestrator>,
    mail_provider: Arc<dyn MailProvider>,
    credential_stores: CredentialStoreFactory,
    oauth_client: Arc<dyn OAuthHttpClient>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_lookup(workspace_root, Arc::new(|key: &str| std::env::var(key).ok()))
    }

    /// Builds the state with `lookup` standing in for the process environment.
    pub fn with_lookup(workspace_root: PathBuf, lookup: Lookup) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = read_app_settings(&bootstrap.config_dir)?;
        let gmail_settings = read_gmail_settings(&bootstrap.config_dir)?;
        let extraction_config =
            load_extraction_config(&bootstrap.config_dir, &settings, |key| lookup(key))?;
        let orchestrator = ExtractionOrchestrator::from_config(&extraction_config)?;
        let mail_provider =
            ReqwestGmailClient::new()?.with_max_body_chars(gmail_settings.max_body_chars);

        tracing::info!(
            workspace = %workspace_root.display(),
            user_id = %settings.user_id,
            mode = ?orchestrator.mode(),
            "app state initialized"
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings,
            gmail_settings,
            lookup,
            orchestrator: Arc::new(orchestrator),
            mail_provider: Arc::new(mail_provider),
            credential_stores: Arc::new(|user_id: &str| {
                Arc::new(KeyringCredentialStore::for_user(user_id)) as Arc<dyn CredentialStore>
            }),
            oauth_client: Arc::new(ReqwestOAuthClient::new()),
        })
    }

    pub fn with_orchestrator(mut self, orchestrator: ExtractionOrchestrator) -> Self {
        self.orchestrator = Arc::new(orchestrator);
        self
    }

    pub fn with_mail_provider(mut self, mail_provider: Arc<dyn MailProvider>) -> Self {
        self.mail_provider = mail_provider;
        self
    }

    pub fn with_credential_store_factory(mut self, factory: CredentialStoreFactory) -> Self {
        self.credential_stores = factory;
        self
    }

    pub fn with_oauth_client(mut self, oauth_client: Arc<dyn OAuthHttpClient>) -> Self {
        self.oauth_client = oauth_client;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn extraction_mode(&self) -> ExtractionMode {
        self.orchestrator.mode()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }

    fn user_id(&self, user_id: Option<String>) -> String {
        user_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.settings.user_id.clone())
    }

    fn candidates(&self) -> SqliteCandidateRepository {
        SqliteCandidateRepository::new(&self.database_path)
    }

    fn history(&self) -> SqliteAnalysisHistoryRepository {
        SqliteAnalysisHistoryRepository::new(&self.database_path)
    }

    fn analysis_service(&self) -> EmailAnalysisService {
        EmailAnalysisService::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.mail_provider),
            Arc::new(self.candidates()),
            Arc::new(self.history()),
            self.gmail_settings.query.clone(),
        )
    }

    fn oauth_manager(
        &self,
        user_id: &str,
    ) -> Result<OAuthManager<dyn CredentialStore, dyn OAuthHttpClient>, InfraError> {
        let config = load_oauth_config_from_lookup(|key| (self.lookup)(key))?;
        Ok(OAuthManager::new(
            config,
            (self.credential_stores)(user_id),
            Arc::clone(&self.oauth_client),
        ))
    }

    async fn required_access_token(&self, user_id: &str) -> Result<String, InfraError> {
        self.oauth_manager(user_id)?.access_token().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateGoogleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeTextResponse {
    pub mode: ExtractionMode,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateListResponse {
    pub tasks: Vec<StoredTaskCandidate>,
    pub events: Vec<StoredEventCandidate>,
}

pub async fn authenticate_google_impl(
    state: &AppState,
    user_id: Option<String>,
    authorization_code: Option<String>,
) -> Result<AuthenticateGoogleResponse, InfraError> {
    let user_id = state.user_id(user_id);
    let manager = state.oauth_manager(&user_id)?;

    if let Some(raw_code) = authorization_code {
        let code = raw_code.trim();
        if code.is_empty() {
            return Err(InfraError::InvalidConfig(
                "authorization_code must not be empty".to_string(),
            ));
        }
        let token = manager.authenticate_with_code(code).await?;
        tracing::info!(user_id = %user_id, "stored gmail oauth token");
        return Ok(AuthenticateGoogleResponse {
            status: "authenticated".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        });
    }

    match manager.ensure_access_token().await? {
        EnsureTokenResult::Existing(token) => Ok(AuthenticateGoogleResponse {
            status: "existing".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        }),
        EnsureTokenResult::Refreshed(token) => Ok(AuthenticateGoogleResponse {
            status: "refreshed".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        }),
        EnsureTokenResult::ReauthenticationRequired => {
            let auth_state = format!("oauth-state-{}", uuid::Uuid::new_v4());
            Ok(AuthenticateGoogleResponse {
                status: "reauthentication_required".to_string(),
                authorization_url: Some(manager.build_authorization_url(&auth_state)?),
                expires_at: None,
            })
        }
    }
}

pub async fn analyze_text_impl(
    state: &AppState,
    email_body: String,
    sender: String,
    subject: String,
) -> Result<AnalyzeTextResponse, InfraError> {
    let request = ExtractionRequest::new(email_body, sender, subject);
    let analysis = state.orchestrator.analyze_request(&request).await;
    Ok(AnalyzeTextResponse {
        mode: state.orchestrator.mode(),
        analysis,
    })
}

pub async fn analyze_email_impl(
    state: &AppState,
    user_id: Option<String>,
    email_id: String,
) -> Result<AnalysisReport, InfraError> {
    let email_id = required_argument(&email_id, "email_id")?;
    let user_id = state.user_id(user_id);
    let access_token = state.required_access_token(&user_id).await?;
    state
        .analysis_service()
        .analyze_email(&user_id, &access_token, &email_id)
        .await
}

pub async fn analyze_recent_emails_impl(
    state: &AppState,
    user_id: Option<String>,
    limit: Option<u32>,
) -> Result<BatchAnalysisSummary, InfraError> {
    let user_id = state.user_id(user_id);
    let limit = limit
        .filter(|value| *value > 0)
        .unwrap_or(state.gmail_settings.max_results);
    let access_token = state.required_access_token(&user_id).await?;
    state
        .analysis_service()
        .analyze_recent_emails(&user_id, &access_token, limit)
        .await
}

pub fn list_candidates_impl(
    state: &AppState,
    user_id: Option<String>,
    limit: Option<u32>,
) -> Result<CandidateListResponse, InfraError> {
    let user_id = state.user_id(user_id);
    let limit = limit.unwrap_or(DEFAULT_CANDIDATE_LIST_LIMIT);
    let repository = state.candidates();
    Ok(CandidateListResponse {
        tasks: repository.list_task_candidates(&user_id, limit)?,
        events: repository.list_event_candidates(&user_id, limit)?,
    })
}

pub fn approve_task_candidate_impl(
    state: &AppState,
    user_id: Option<String>,
    candidate_id: String,
) -> Result<Todo, InfraError> {
    let candidate_id = required_argument(&candidate_id, "candidate_id")?;
    let todo = state
        .candidates()
        .approve_task_candidate(&state.user_id(user_id), &candidate_id)?;
    tracing::info!(candidate_id = %candidate_id, todo_id = %todo.id, "task candidate approved");
    Ok(todo)
}

pub fn approve_event_candidate_impl(
    state: &AppState,
    user_id: Option<String>,
    candidate_id: String,
) -> Result<CalendarEntry, InfraError> {
    let candidate_id = required_argument(&candidate_id, "candidate_id")?;
    let event = state
        .candidates()
        .approve_event_candidate(&state.user_id(user_id), &candidate_id)?;
    tracing::info!(candidate_id = %candidate_id, event_id = %event.id, "event candidate approved");
    Ok(event)
}

pub fn reject_task_candidate_impl(
    state: &AppState,
    user_id: Option<String>,
    candidate_id: String,
) -> Result<bool, InfraError> {
    let candidate_id = required_argument(&candidate_id, "candidate_id")?;
    state
        .candidates()
        .reject_task_candidate(&state.user_id(user_id), &candidate_id)?;
    Ok(true)
}

pub fn reject_event_candidate_impl(
    state: &AppState,
    user_id: Option<String>,
    candidate_id: String,
) -> Result<bool, InfraError> {
    let candidate_id = required_argument(&candidate_id, "candidate_id")?;
    state
        .candidates()
        .reject_event_candidate(&state.user_id(user_id), &candidate_id)?;
    Ok(true)
}

pub fn list_todos_impl(
    state: &AppState,
    user_id: Option<String>,
    include_completed: bool,
) -> Result<Vec<Todo>, InfraError> {
    state
        .candidates()
        .list_todos(&state.user_id(user_id), include_completed)
}

pub fn complete_todo_impl(
    state: &AppState,
    user_id: Option<String>,
    todo_id: String,
) -> Result<Todo, InfraError> {
    let todo_id = required_argument(&todo_id, "todo_id")?;
    state.candidates().complete_todo(&state.user_id(user_id), &todo_id)
}

pub fn delete_todo_impl(
    state: &AppState,
    user_id: Option<String>,
    todo_id: String,
) -> Result<bool, InfraError> {
    let todo_id = required_argument(&todo_id, "todo_id")?;
    state.candidates().delete_todo(&state.user_id(user_id), &todo_id)?;
    Ok(true)
}

pub fn list_events_impl(
    state: &AppState,
    user_id: Option<String>,
) -> Result<Vec<CalendarEntry>, InfraError> {
    state.candidates().list_events(&state.user_id(user_id))
}

pub fn delete_event_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> Result<bool, InfraError> {
    let event_id = required_argument(&event_id, "event_id")?;
    state.candidates().delete_event(&state.user_id(user_id), &event_id)?;
    Ok(true)
}

pub fn analysis_history_impl(
    state: &AppState,
    user_id: Option<String>,
    limit: Option<u32>,
) -> Result<Vec<AnalysisHistoryEntry>, InfraError> {
    state.history().list(
        &state.user_id(user_id),
        limit.unwrap_or(DEFAULT_HISTORY_LIST_LIMIT),
    )
}

/// Forgets that an email was analyzed so the next batch picks it up again.
pub fn delete_analysis_history_impl(
    state: &AppState,
    user_id: Option<String>,
    email_id: String,
) -> Result<bool, InfraError> {
    let email_id = required_argument(&email_id, "email_id")?;
    state.history().delete(&state.user_id(user_id), &email_id)?;
    Ok(true)
}

fn required_argument(value: &str, field_name: &str) -> Result<String, InfraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InfraError::InvalidConfig(format!("{field_name} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn load_extraction_config<F>(
    config_dir: &Path,
    settings: &AppSettings,
    lookup: F,
) -> Result<ExtractionConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let extraction = read_extraction_settings(config_dir)?;
    let api_key = optional_lookup_value(
        &lookup,
        &[extraction.api_key_env.as_str(), DEFAULT_API_KEY_ENV],
    );
    Ok(ExtractionConfig::from_settings(
        &extraction,
        api_key,
        settings.timezone,
    ))
}

fn load_oauth_config_from_lookup<F>(lookup: F) -> Result<OAuthConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["INBOX_PLANNER_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["INBOX_PLANNER_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;
    let redirect_uri = optional_lookup_value(
        &lookup,
        &["INBOX_PLANNER_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"],
    )
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, &["INBOX_PLANNER_GOOGLE_SCOPES", "GOOGLE_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(default_gmail_scopes);

    Ok(OAuthConfig::new(client_id, client_secret, redirect_uri, scopes))
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|&key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
