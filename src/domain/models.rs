use crate::domain::datetime::{canonical, canonical_option};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidates scoring below this are never persisted.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn meets_confidence_threshold(confidence: f64) -> bool {
    confidence >= CONFIDENCE_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub email_body: String,
    pub sender: String,
    pub subject: String,
}

impl ExtractionRequest {
    pub fn new(
        email_body: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            email_body: email_body.into(),
            sender: sender.into(),
            subject: subject.into(),
        }
    }

    pub fn from_email(email: &EmailMessage) -> Self {
        Self::new(email.body.clone(), email.sender.clone(), email.subject.clone())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Unknown labels fall back to medium.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCandidate {
    pub title: String,
    pub description: String,
    #[serde(with = "canonical_option")]
    pub due_date: Option<NaiveDateTime>,
    pub priority: Priority,
    pub confidence: f64,
}

impl TaskCandidate {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")?;
        validate_confidence(self.confidence, "task.confidence")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventCandidate {
    pub title: String,
    pub description: String,
    #[serde(with = "canonical")]
    pub start: NaiveDateTime,
    #[serde(with = "canonical")]
    pub end: NaiveDateTime,
    pub location: String,
    pub confidence: f64,
}

impl EventCandidate {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "event.title")?;
        if self.end < self.start {
            return Err("event.end must be >= event.start".to_string());
        }
        validate_confidence(self.confidence, "event.confidence")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub tasks: Vec<TaskCandidate>,
    pub events: Vec<EventCandidate>,
    pub overall_confidence: f64,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            events: Vec::new(),
            overall_confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.events.is_empty()
    }
}

/// Approval moves a candidate into `todos`/`events` and rejection deletes it,
/// so a stored candidate is always pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            other => Err(format!("unsupported candidate status: {other}")),
        }
    }
}

/// The email a candidate was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailSource {
    pub email_id: String,
    pub subject: String,
    pub sender: String,
}

impl From<&EmailMessage> for EmailSource {
    fn from(email: &EmailMessage) -> Self {
        Self {
            email_id: email.id.clone(),
            subject: email.subject.clone(),
            sender: email.sender.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTaskCandidate {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub candidate: TaskCandidate,
    pub status: CandidateStatus,
    pub source: Option<EmailSource>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEventCandidate {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub candidate: EventCandidate,
    pub status: CandidateStatus,
    pub source: Option<EmailSource>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Approved,
    Completed,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unsupported todo status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Todo {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(with = "canonical_option")]
    pub due_date: Option<NaiveDateTime>,
    pub priority: Priority,
    pub status: TodoStatus,
    pub completed: bool,
    pub confidence: f64,
    pub source_email_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: DateTime<Utc>,
}

impl Todo {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "todo.id")?;
        validate_non_empty(&self.title, "todo.title")?;
        if self.completed != (self.status == TodoStatus::Completed) {
            return Err("todo.completed must match todo.status".to_string());
        }
        Ok(())
    }
}

/// An approved event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(with = "canonical")]
    pub start: NaiveDateTime,
    #[serde(with = "canonical")]
    pub end: NaiveDateTime,
    pub location: String,
    pub confidence: f64,
    pub source_email_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisHistoryEntry {
    pub user_id: String,
    pub email_id: String,
    pub email_subject: String,
    pub email_sender: String,
    pub analysis: AnalysisResult,
    pub saved_tasks_count: u32,
    pub saved_events_count: u32,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_confidence(value: f64, field_name: &str) -> Result<(), String> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{field_name} must be within [0, 1]"));
    }
    Ok(())
}
