use crate::infrastructure::error::{ExtractionError, InfraError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModelBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct GeminiClientConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ReqwestGeminiClient {
    client: Client,
    url: Url,
}

impl ReqwestGeminiClient {
    pub fn new(config: GeminiClientConfig) -> Result<Self, InfraError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
        let url = Self::generate_endpoint(&config.endpoint, &config.model, &config.api_key)?;
        Ok(Self { client, url })
    }

    fn generate_endpoint(endpoint: &str, model: &str, api_key: &str) -> Result<Url, InfraError> {
        if model.trim().is_empty() {
            return Err(InfraError::InvalidConfig("gemini model must not be empty".to_string()));
        }
        let mut url = Url::parse(endpoint)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid gemini endpoint: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("gemini endpoint cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push(&format!("{}:generateContent", model.trim()));
        }
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

fn first_candidate_text(payload: &Value) -> Option<&str> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
}

#[async_trait]
impl LanguageModelBackend for ReqwestGeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
        let payload = serde_json::json!({
            "contents": [
                {"parts": [{"text": prompt}]}
            ]
        });

        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_connect() {
                    ExtractionError::BackendUnavailable
                } else {
                    ExtractionError::BackendCall(format!("network error: {error}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ExtractionError::BackendCall(format!("failed reading response: {error}")))?;
        if !status.is_success() {
            return Err(ExtractionError::BackendCall(format!(
                "http {}; body={body}",
                status.as_u16()
            )));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|error| {
            ExtractionError::BackendCall(format!("invalid response payload: {error}"))
        })?;
        first_candidate_text(&parsed)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ExtractionError::BackendCall("response has no text content".to_string()))
    }
}
