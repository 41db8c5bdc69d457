use crate::domain::datetime::UnparsedDatePolicy;
use crate::domain::heuristic::heuristic_analysis;
use crate::domain::models::{AnalysisResult, ExtractionRequest};
use crate::domain::normalizer::{LocalNowProvider, ResultNormalizer};
use crate::domain::prompt::build_analysis_prompt;
use crate::domain::response_parser::parse_response;
use crate::infrastructure::config::{ExtractionSettings, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use crate::infrastructure::error::{ExtractionError, InfraError};
use crate::infrastructure::gemini_client::{
    GeminiClientConfig, LanguageModelBackend, ReqwestGeminiClient,
};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Value shipped in sample env files; treated as "no key".
pub const GEMINI_KEY_PLACEHOLDER: &str = "your_gemini_api_key_here";

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub request_timeout: Option<Duration>,
    pub unparsed_date_policy: UnparsedDatePolicy,
    pub timezone: Tz,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            request_timeout: None,
            unparsed_date_policy: UnparsedDatePolicy::default(),
            timezone: Tz::UTC,
        }
    }
}

impl ExtractionConfig {
    pub fn from_settings(settings: &ExtractionSettings, api_key: Option<String>, timezone: Tz) -> Self {
        Self {
            api_key,
            model: settings.model.clone(),
            endpoint: settings.endpoint.clone(),
            request_timeout: settings.request_timeout_seconds.map(Duration::from_secs),
            unparsed_date_policy: settings.unparsed_date_policy,
            timezone,
        }
    }

    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != GEMINI_KEY_PLACEHOLDER)
    }

    fn local_now_provider(&self) -> LocalNowProvider {
        let timezone = self.timezone;
        Arc::new(move || Utc::now().with_timezone(&timezone).naive_local())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Llm,
    Heuristic,
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn mode(&self) -> ExtractionMode;
    async fn extract(&self, request: &ExtractionRequest) -> Result<AnalysisResult, ExtractionError>;
}

pub struct HeuristicStrategy {
    now_provider: LocalNowProvider,
}

impl HeuristicStrategy {
    pub fn new(now_provider: LocalNowProvider) -> Self {
        Self { now_provider }
    }

    pub fn analyze(&self, request: &ExtractionRequest) -> AnalysisResult {
        heuristic_analysis(request, (self.now_provider)())
    }
}

#[async_trait]
impl ExtractionStrategy for HeuristicStrategy {
    fn mode(&self) -> ExtractionMode {
        ExtractionMode::Heuristic
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<AnalysisResult, ExtractionError> {
        Ok(self.analyze(request))
    }
}

/// Prompt, call the model, parse, normalize.
pub struct LlmStrategy {
    backend: Arc<dyn LanguageModelBackend>,
    normalizer: ResultNormalizer,
}

impl LlmStrategy {
    pub fn new(backend: Arc<dyn LanguageModelBackend>, normalizer: ResultNormalizer) -> Self {
        Self { backend, normalizer }
    }
}

#[async_trait]
impl ExtractionStrategy for LlmStrategy {
    fn mode(&self) -> ExtractionMode {
        ExtractionMode::Llm
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<AnalysisResult, ExtractionError> {
        let prompt = build_analysis_prompt(request);
        let text = self.backend.generate(&prompt).await?;
        let raw = parse_response(&text)?;
        Ok(self.normalizer.normalize(&raw))
    }
}

pub struct ExtractionOrchestrator {
    strategy: Box<dyn ExtractionStrategy>,
    fallback: HeuristicStrategy,
}

impl ExtractionOrchestrator {
    /// Picks the mode once: a usable API key means the model path.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, InfraError> {
        let now_provider = config.local_now_provider();
        let Some(api_key) = config.usable_api_key() else {
            tracing::info!("no usable gemini api key; extraction runs in heuristic mode");
            return Ok(Self::heuristic(now_provider));
        };

        let backend = ReqwestGeminiClient::new(GeminiClientConfig {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            request_timeout: config.request_timeout,
        })?;
        tracing::info!(model = %config.model, "extraction runs in llm mode");
        Ok(Self::with_backend(
            Arc::new(backend),
            config.unparsed_date_policy,
            now_provider,
        ))
    }

    pub fn heuristic(now_provider: LocalNowProvider) -> Self {
        Self {
            strategy: Box::new(HeuristicStrategy::new(Arc::clone(&now_provider))),
            fallback: HeuristicStrategy::new(now_provider),
        }
    }

    pub fn with_backend(
        backend: Arc<dyn LanguageModelBackend>,
        unparsed_date_policy: UnparsedDatePolicy,
        now_provider: LocalNowProvider,
    ) -> Self {
        let normalizer =
            ResultNormalizer::new(unparsed_date_policy).with_now_provider(Arc::clone(&now_provider));
        Self {
            strategy: Box::new(LlmStrategy::new(backend, normalizer)),
            fallback: HeuristicStrategy::new(now_provider),
        }
    }

    pub fn mode(&self) -> ExtractionMode {
        self.strategy.mode()
    }

    pub async fn analyze(&self, email_body: &str, sender: &str, subject: &str) -> AnalysisResult {
        self.analyze_request(&ExtractionRequest::new(email_body, sender, subject))
            .await
    }

    /// Never fails: backend errors fall back to the heuristic for this call
    /// only, unparsable model output yields an empty result.
    pub async fn analyze_request(&self, request: &ExtractionRequest) -> AnalysisResult {
        match self.strategy.extract(request).await {
            Ok(result) => result,
            Err(ExtractionError::Parse(error)) => {
                tracing::warn!(%error, subject = %request.subject, "model response was not usable");
                AnalysisResult::empty()
            }
            Err(error) => {
                tracing::warn!(%error, subject = %request.subject, "model call failed; using heuristic");
                self.fallback.analyze(request)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::datetime::CANONICAL_FORMAT;
    use chrono::NaiveDateTime;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, ExtractionError>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_replies(replies: Vec<Result<String, ExtractionError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl LanguageModelBackend for ScriptedBackend {
        async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::BackendCall("no scripted reply".to_string())))
        }
    }

    fn fixed_now() -> LocalNowProvider {
        let now = NaiveDateTime::parse_from_str("2025-02-20T08:30:00", CANONICAL_FORMAT)
            .expect("valid now");
        Arc::new(move || now)
    }

    fn orchestrator(backend: Arc<ScriptedBackend>) -> ExtractionOrchestrator {
        ExtractionOrchestrator::with_backend(backend, UnparsedDatePolicy::Absent, fixed_now())
    }

    #[test]
    fn placeholder_or_blank_key_selects_heuristic_mode() {
        for api_key in [None, Some(""), Some("   "), Some(GEMINI_KEY_PLACEHOLDER)] {
            let config = ExtractionConfig {
                api_key: api_key.map(ToOwned::to_owned),
                ..ExtractionConfig::default()
            };
            let orchestrator = ExtractionOrchestrator::from_config(&config).expect("build");
            assert_eq!(orchestrator.mode(), ExtractionMode::Heuristic);
        }
    }

    #[test]
    fn real_key_selects_llm_mode() {
        let config = ExtractionConfig {
            api_key: Some("real-key".to_string()),
            ..ExtractionConfig::default()
        };
        let orchestrator = ExtractionOrchestrator::from_config(&config).expect("build");
        assert_eq!(orchestrator.mode(), ExtractionMode::Llm);
    }

    #[tokio::test]
    async fn heuristic_mode_handles_meeting_subject() {
        let orchestrator = ExtractionOrchestrator::heuristic(fixed_now());
        let result = orchestrator
            .analyze("Agenda attached", "bob@example.com", "Project meeting")
            .await;

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].confidence, 0.8);
        assert!(result.tasks.is_empty());
        assert_eq!(result.overall_confidence, 0.6);
    }

    #[tokio::test]
    async fn llm_output_is_parsed_and_normalized() {
        let backend = ScriptedBackend::with_replies(vec![Ok(r#"Here you go:
            {"tasks": [{"title": "Send slides", "due_date": "2025-03-01", "priority": "high", "confidence": 0.9},
                       {"title": "", "confidence": 0.9},
                       {"title": "Maybe later", "confidence": 0.3}],
             "events": [{"title": "Kickoff", "start": "2025-03-02 14:00", "confidence": "0.85"}],
             "overall_confidence": 0.8}"#
            .to_string())]);
        let orchestrator = orchestrator(Arc::clone(&backend));

        let result = orchestrator
            .analyze("Please send slides before the kickoff", "carol@example.com", "Kickoff")
            .await;

        assert_eq!(orchestrator.mode(), ExtractionMode::Llm);
        assert_eq!(result.tasks.len(), 2);
        assert_eq!(result.tasks[0].title, "Send slides");
        assert_eq!(
            result.tasks[0].due_date.map(|value| value.format(CANONICAL_FORMAT).to_string()),
            Some("2025-03-01T09:00:00".to_string())
        );
        assert_eq!(result.tasks[1].confidence, 0.3);
        assert_eq!(result.events.len(), 1);
        assert_eq!(
            result.events[0].end.format(CANONICAL_FORMAT).to_string(),
            "2025-03-02T15:00:00"
        );
        assert_eq!(result.events[0].confidence, 0.85);
        assert_eq!(result.overall_confidence, 0.8);

        let prompts = backend.prompts.lock().expect("prompts lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Please send slides before the kickoff"));
        assert!(prompts[0].contains("carol@example.com"));
    }

    #[tokio::test]
    async fn unparsable_output_yields_empty_result() {
        let backend =
            ScriptedBackend::with_replies(vec![Ok("I could not find anything.".to_string())]);
        let result = orchestrator(backend)
            .analyze("body", "sender", "Team meeting")
            .await;
        assert_eq!(result, AnalysisResult::empty());
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_heuristic_for_that_call_only() {
        let backend = ScriptedBackend::with_replies(vec![
            Err(ExtractionError::BackendCall("http 503".to_string())),
            Err(ExtractionError::BackendUnavailable),
            Ok(r#"{"tasks": [], "events": [], "overall_confidence": 0.4}"#.to_string()),
        ]);
        let orchestrator = orchestrator(Arc::clone(&backend));

        let first = orchestrator.analyze("", "dave", "Weekly meeting").await;
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.overall_confidence, 0.6);

        let second = orchestrator.analyze("", "dave", "資料作成のお願い").await;
        assert_eq!(second.tasks.len(), 1);

        let third = orchestrator.analyze("", "dave", "Weekly meeting").await;
        assert!(third.is_empty());
        assert_eq!(third.overall_confidence, 0.4);

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(orchestrator.mode(), ExtractionMode::Llm);
    }
}
