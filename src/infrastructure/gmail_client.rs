use crate::domain::models::EmailMessage;
use crate::infrastructure::config::DEFAULT_MAX_BODY_CHARS;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use url::Url;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/";

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_recent_messages(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<EmailMessage>, InfraError>;

    /// `Ok(None)` when the mailbox has no message with this id.
    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<Option<EmailMessage>, InfraError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

pub struct ReqwestGmailClient {
    client: Client,
    api_base: Url,
    max_body_chars: usize,
    now_provider: NowProvider,
}

impl ReqwestGmailClient {
    pub fn new() -> Result<Self, InfraError> {
        Self::with_api_base(GMAIL_API_BASE)
    }

    pub fn with_api_base(api_base: &str) -> Result<Self, InfraError> {
        let api_base = Url::parse(api_base)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid gmail api base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            api_base,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars.max(1);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn messages_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Gmail("gmail api base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(["users", "me", "messages"]);
        }
        Ok(url)
    }

    fn message_endpoint(&self, message_id: &str) -> Result<Url, InfraError> {
        let mut url = self.messages_endpoint()?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Gmail("gmail messages URL cannot be a base".to_string()))?;
            segments.push(message_id);
        }
        Ok(url)
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        if status == StatusCode::UNAUTHORIZED {
            return InfraError::AuthenticationRequired(
                "gmail rejected the access token".to_string(),
            );
        }
        if body.trim().is_empty() {
            InfraError::Gmail(format!("http {}", status.as_u16()))
        } else {
            InfraError::Gmail(format!("http {}; body={body}", status.as_u16()))
        }
    }

    fn to_email_message(&self, detail: MessageDetail) -> EmailMessage {
        let payload = detail.payload.unwrap_or(MessagePayload {
            mime_type: String::new(),
            headers: Vec::new(),
            body: None,
            parts: Vec::new(),
        });
        let header = |name: &str| {
            payload
                .headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.clone())
        };

        let subject = header("Subject").unwrap_or_default();
        let sender = header("From").unwrap_or_default();
        let date = header("Date")
            .and_then(|raw| parse_mail_date(&raw))
            .unwrap_or_else(|| (self.now_provider)())
            .to_rfc3339();
        let body = extract_body_text(&payload, "text/plain")
            .or_else(|| extract_body_text(&payload, "text/html").map(|html| strip_html(&html)))
            .map(|text| truncate_body(&text, self.max_body_chars))
            .unwrap_or_default();

        EmailMessage {
            id: detail.id,
            thread_id: detail.thread_id,
            subject,
            sender,
            date,
            body,
            snippet: detail.snippet,
        }
    }
}

#[async_trait]
impl MailProvider for ReqwestGmailClient {
    async fn list_recent_messages(
        &self,
        access_token: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<EmailMessage>, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::AuthenticationRequired("access token is empty".to_string()));
        }

        let response = self
            .client
            .get(self.messages_endpoint()?)
            .bearer_auth(access_token)
            .query(&[("q", query.to_string()), ("maxResults", limit.to_string())])
            .send()
            .await
            .map_err(|error| InfraError::Gmail(format!("network error while listing messages: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Gmail(format!("failed reading message list: {error}")))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let list: MessageListResponse = serde_json::from_str(&body)
            .map_err(|error| InfraError::Gmail(format!("invalid message list payload: {error}")))?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in list.messages.into_iter().take(limit as usize) {
            match self.get_message(access_token, &stub.id).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {
                    tracing::warn!(message_id = %stub.id, "listed message disappeared before fetch");
                }
                Err(error @ InfraError::AuthenticationRequired(_)) => return Err(error),
                Err(error) => {
                    tracing::warn!(message_id = %stub.id, %error, "skipping message that failed to load");
                }
            }
        }
        Ok(messages)
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<Option<EmailMessage>, InfraError> {
        if message_id.trim().is_empty() {
            return Err(InfraError::Gmail("message id must not be empty".to_string()));
        }

        let response = self
            .client
            .get(self.message_endpoint(message_id)?)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(|error| InfraError::Gmail(format!("network error while fetching message: {error}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Gmail(format!("failed reading message: {error}")))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let detail: MessageDetail = serde_json::from_str(&body)
            .map_err(|error| InfraError::Gmail(format!("invalid message payload: {error}")))?;
        Ok(Some(self.to_email_message(detail)))
    }
}

fn extract_body_text(payload: &MessagePayload, target_mime: &str) -> Option<String> {
    if payload.mime_type.eq_ignore_ascii_case(target_mime) {
        if let Some(text) = payload
            .body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .and_then(decode_url_safe_base64)
        {
            return Some(text);
        }
    }
    payload
        .parts
        .iter()
        .find_map(|part| extract_body_text(part, target_mime))
}

fn decode_url_safe_base64(data: &str) -> Option<String> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn re_html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("html tag pattern compiles"))
}

fn re_blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("blank line pattern compiles"))
}

fn strip_html(html: &str) -> String {
    let text = re_html_tag().replace_all(html, "");
    re_blank_lines()
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

fn truncate_body(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn parse_mail_date(raw: &str) -> Option<DateTime<Utc>> {
    // Drop trailing comments such as "(UTC)".
    let trimmed = match raw.find(" (") {
        Some(index) => &raw[..index],
        None => raw,
    };
    DateTime::parse_from_rfc2822(trimmed.trim())
        .ok()
        .map(|value| value.with_timezone(&Utc))
}
