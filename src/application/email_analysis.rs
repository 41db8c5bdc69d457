use crate::application::extraction::{ExtractionMode, ExtractionOrchestrator};
use crate::domain::models::{
    meets_confidence_threshold, AnalysisHistoryEntry, AnalysisResult, EmailMessage, EmailSource,
    ExtractionRequest,
};
use crate::infrastructure::analysis_history_repository::AnalysisHistoryRepository;
use crate::infrastructure::candidate_repository::CandidateRepository;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::gmail_client::MailProvider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub email_id: String,
    pub email_subject: String,
    pub email_sender: String,
    pub mode: ExtractionMode,
    pub analysis: AnalysisResult,
    pub saved_task_ids: Vec<String>,
    pub saved_event_ids: Vec<String>,
}

impl AnalysisReport {
    pub fn saved_count(&self) -> usize {
        self.saved_task_ids.len() + self.saved_event_ids.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchAnalysisSummary {
    pub total_emails: usize,
    pub total_analyzed: usize,
    pub skipped_already_analyzed: usize,
    pub total_saved: usize,
    pub errors: Vec<String>,
    pub reports: Vec<AnalysisReport>,
}

/// Fetch, analyze, gate on confidence, then store candidates and the history
/// entry in one transaction.
pub struct EmailAnalysisService {
    orchestrator: Arc<ExtractionOrchestrator>,
    mail_provider: Arc<dyn MailProvider>,
    candidates: Arc<dyn CandidateRepository>,
    history: Arc<dyn AnalysisHistoryRepository>,
    gmail_query: String,
    now_provider: NowProvider,
}

impl EmailAnalysisService {
    pub fn new(
        orchestrator: Arc<ExtractionOrchestrator>,
        mail_provider: Arc<dyn MailProvider>,
        candidates: Arc<dyn CandidateRepository>,
        history: Arc<dyn AnalysisHistoryRepository>,
        gmail_query: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            mail_provider,
            candidates,
            history,
            gmail_query: gmail_query.into(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn analyze_message(
        &self,
        user_id: &str,
        email: &EmailMessage,
    ) -> Result<AnalysisReport, InfraError> {
        let analysis = self
            .orchestrator
            .analyze_request(&ExtractionRequest::from_email(email))
            .await;
        let tasks: Vec<_> = analysis
            .tasks
            .iter()
            .filter(|task| meets_confidence_threshold(task.confidence))
            .cloned()
            .collect();
        let events: Vec<_> = analysis
            .events
            .iter()
            .filter(|event| meets_confidence_threshold(event.confidence))
            .cloned()
            .collect();
        let history = AnalysisHistoryEntry {
            user_id: user_id.to_string(),
            email_id: email.id.clone(),
            email_subject: email.subject.clone(),
            email_sender: email.sender.clone(),
            analysis: analysis.clone(),
            saved_tasks_count: tasks.len() as u32,
            saved_events_count: events.len() as u32,
            analyzed_at: (self.now_provider)(),
        };
        let saved = self.candidates.save_analysis(
            &EmailSource::from(email),
            &tasks,
            &events,
            &history,
        )?;
        let saved_task_ids = saved.task_ids;
        let saved_event_ids = saved.event_ids;

        tracing::info!(
            user_id,
            email_id = %email.id,
            tasks = analysis.tasks.len(),
            events = analysis.events.len(),
            saved_tasks = saved_task_ids.len(),
            saved_events = saved_event_ids.len(),
            "email analyzed"
        );

        Ok(AnalysisReport {
            email_id: email.id.clone(),
            email_subject: email.subject.clone(),
            email_sender: email.sender.clone(),
            mode: self.orchestrator.mode(),
            analysis,
            saved_task_ids,
            saved_event_ids,
        })
    }

    pub async fn analyze_email(
        &self,
        user_id: &str,
        access_token: &str,
        email_id: &str,
    ) -> Result<AnalysisReport, InfraError> {
        let email = self
            .mail_provider
            .get_message(access_token, email_id)
            .await?
            .ok_or_else(|| InfraError::NotFound(format!("email {email_id}")))?;
        self.analyze_message(user_id, &email).await
    }

    /// Emails are processed one after another; already-analyzed ones are
    /// skipped and per-email failures are collected instead of aborting.
    pub async fn analyze_recent_emails(
        &self,
        user_id: &str,
        access_token: &str,
        limit: u32,
    ) -> Result<BatchAnalysisSummary, InfraError> {
        let emails = self
            .mail_provider
            .list_recent_messages(access_token, &self.gmail_query, limit)
            .await?;

        let mut summary = BatchAnalysisSummary {
            total_emails: emails.len(),
            ..BatchAnalysisSummary::default()
        };

        for email in &emails {
            match self.history.is_analyzed(user_id, &email.id) {
                Ok(true) => {
                    summary.skipped_already_analyzed += 1;
                    continue;
                }
                Ok(false) => {}
                Err(error) => {
                    summary.errors.push(format!("{}: {error}", email.id));
                    continue;
                }
            }

            match self.analyze_message(user_id, email).await {
                Ok(report) => {
                    summary.total_analyzed += 1;
                    summary.total_saved += report.saved_count();
                    summary.reports.push(report);
                }
                Err(error) => {
                    tracing::warn!(user_id, email_id = %email.id, %error, "email analysis failed");
                    summary.errors.push(format!("{}: {error}", email.id));
                }
            }
        }

        tracing::info!(
            user_id,
            total_emails = summary.total_emails,
            total_analyzed = summary.total_analyzed,
            total_saved = summary.total_saved,
            errors = summary.errors.len(),
            "batch analysis finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::datetime::CANONICAL_FORMAT;
    use crate::domain::datetime::UnparsedDatePolicy;
    use crate::infrastructure::analysis_history_repository::SqliteAnalysisHistoryRepository;
    use crate::infrastructure::candidate_repository::SqliteCandidateRepository;
    use crate::infrastructure::error::ExtractionError;
    use crate::infrastructure::gemini_client::LanguageModelBackend;
    use crate::infrastructure::storage::initialize_database;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempState {
        dir: PathBuf,
        db_path: PathBuf,
    }

    impl TempState {
        fn new() -> Self {
            let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "inbox-planner-analysis-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let db_path = dir.join("state.sqlite");
            initialize_database(&db_path).expect("initialize database");
            Self { dir, db_path }
        }
    }

    impl Drop for TempState {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[derive(Default)]
    struct FakeMailbox {
        messages: Vec<EmailMessage>,
    }

    #[async_trait]
    impl MailProvider for FakeMailbox {
        async fn list_recent_messages(
            &self,
            _access_token: &str,
            _query: &str,
            limit: u32,
        ) -> Result<Vec<EmailMessage>, InfraError> {
            Ok(self.messages.iter().take(limit as usize).cloned().collect())
        }

        async fn get_message(
            &self,
            _access_token: &str,
            message_id: &str,
        ) -> Result<Option<EmailMessage>, InfraError> {
            Ok(self.messages.iter().find(|message| message.id == message_id).cloned())
        }
    }

    /// Replies with the canned output whose subject appears in the prompt.
    struct SubjectBackend {
        replies: HashMap<String, String>,
    }

    #[async_trait]
    impl LanguageModelBackend for SubjectBackend {
        async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
            self.replies
                .iter()
                .find(|(subject, _)| prompt.contains(&format!("Subject: {subject}\n")))
                .map(|(_, reply)| reply.clone())
                .ok_or_else(|| ExtractionError::BackendCall("unknown subject".to_string()))
        }
    }

    fn email(id: &str, subject: &str) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            thread_id: format!("thread-{id}"),
            subject: subject.to_string(),
            sender: "boss@example.com".to_string(),
            date: "2025-02-20T00:15:00+00:00".to_string(),
            body: format!("Body of {subject}"),
            snippet: String::new(),
        }
    }

    fn fixed_local_now() -> crate::domain::normalizer::LocalNowProvider {
        let now = NaiveDateTime::parse_from_str("2025-02-20T08:30:00", CANONICAL_FORMAT)
            .expect("valid now");
        Arc::new(move || now)
    }

    fn service(
        state: &TempState,
        mailbox: FakeMailbox,
        orchestrator: ExtractionOrchestrator,
    ) -> (EmailAnalysisService, Arc<SqliteCandidateRepository>) {
        let candidates = Arc::new(SqliteCandidateRepository::new(&state.db_path));
        let history = Arc::new(SqliteAnalysisHistoryRepository::new(&state.db_path));
        let service = EmailAnalysisService::new(
            Arc::new(orchestrator),
            Arc::new(mailbox),
            candidates.clone(),
            history,
            "in:inbox",
        );
        (service, candidates)
    }

    fn llm_orchestrator(replies: &[(&str, &str)]) -> ExtractionOrchestrator {
        let backend = SubjectBackend {
            replies: replies
                .iter()
                .map(|(subject, reply)| (subject.to_string(), reply.to_string()))
                .collect(),
        };
        ExtractionOrchestrator::with_backend(
            Arc::new(backend),
            UnparsedDatePolicy::Absent,
            fixed_local_now(),
        )
    }

    #[tokio::test]
    async fn only_confident_candidates_are_persisted() {
        let state = TempState::new();
        let orchestrator = llm_orchestrator(&[(
            "Budget",
            r#"{"tasks": [
                    {"title": "Approve budget", "confidence": 0.9},
                    {"title": "Maybe review forecast", "confidence": 0.3},
                    {"title": "Borderline", "confidence": 0.5}
                ],
                "events": [{"title": "Budget sync", "start": "2025-03-03T10:00:00", "confidence": 0.49}],
                "overall_confidence": 0.7}"#,
        )]);
        let (service, candidates) = service(&state, FakeMailbox::default(), orchestrator);

        let report = service
            .analyze_message("alice", &email("m1", "Budget"))
            .await
            .expect("analyze");

        assert_eq!(report.mode, ExtractionMode::Llm);
        assert_eq!(report.analysis.tasks.len(), 3);
        assert_eq!(report.saved_task_ids.len(), 2);
        assert!(report.saved_event_ids.is_empty());

        let stored = candidates.list_task_candidates("alice", 50).expect("list");
        let mut titles: Vec<_> = stored.iter().map(|value| value.candidate.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Approve budget", "Borderline"]);
        assert_eq!(
            stored[0].source.as_ref().map(|source| source.email_id.as_str()),
            Some("m1")
        );
        assert!(candidates.list_event_candidates("alice", 50).expect("list").is_empty());
    }

    #[tokio::test]
    async fn analyze_email_reports_missing_message() {
        let state = TempState::new();
        let (service, _) = service(
            &state,
            FakeMailbox::default(),
            ExtractionOrchestrator::heuristic(fixed_local_now()),
        );
        assert!(matches!(
            service.analyze_email("alice", "token", "missing").await,
            Err(InfraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_skips_already_analyzed_emails() {
        let state = TempState::new();
        let mailbox = FakeMailbox {
            messages: vec![
                email("m1", "Team meeting"),
                email("m2", "Lunch?"),
                email("m3", "レビューのお願い"),
            ],
        };
        let (service, candidates) = service(
            &state,
            mailbox,
            ExtractionOrchestrator::heuristic(fixed_local_now()),
        );

        let first = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("first batch");
        assert_eq!(first.total_emails, 3);
        assert_eq!(first.total_analyzed, 3);
        assert_eq!(first.total_saved, 2);
        assert!(first.errors.is_empty());

        let second = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("second batch");
        assert_eq!(second.total_emails, 3);
        assert_eq!(second.total_analyzed, 0);
        assert_eq!(second.skipped_already_analyzed, 3);
        assert_eq!(second.total_saved, 0);

        assert_eq!(candidates.list_event_candidates("alice", 50).expect("events").len(), 1);
        assert_eq!(candidates.list_task_candidates("alice", 50).expect("tasks").len(), 1);
    }

    #[tokio::test]
    async fn empty_mailbox_is_an_empty_summary() {
        let state = TempState::new();
        let (service, _) = service(
            &state,
            FakeMailbox::default(),
            ExtractionOrchestrator::heuristic(fixed_local_now()),
        );
        let summary = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("batch");
        assert_eq!(summary.total_emails, 0);
        assert_eq!(summary.total_analyzed, 0);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn per_email_failures_are_collected() {
        let state = TempState::new();
        let mailbox = FakeMailbox {
            messages: vec![email("m1", "Team meeting"), email("m2", "Another meeting")],
        };
        let (service, _) = service(
            &state,
            mailbox,
            ExtractionOrchestrator::heuristic(fixed_local_now()),
        );

        // Without the history table every email fails at the history lookup.
        let connection = rusqlite::Connection::open(&state.db_path).expect("open db");
        connection
            .execute_batch("DROP TABLE email_analysis_history")
            .expect("drop table");

        let summary = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("batch");
        assert_eq!(summary.total_emails, 2);
        assert_eq!(summary.total_analyzed, 0);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].starts_with("m1: "));
    }

    #[tokio::test]
    async fn failed_history_write_leaves_no_candidates_behind() {
        let state = TempState::new();
        let mailbox = FakeMailbox {
            messages: vec![email("m1", "Team meeting")],
        };
        let (service, candidates) = service(
            &state,
            mailbox,
            ExtractionOrchestrator::heuristic(fixed_local_now()),
        );

        let connection = rusqlite::Connection::open(&state.db_path).expect("open db");
        connection
            .execute_batch(
                "CREATE TRIGGER reject_history BEFORE INSERT ON email_analysis_history
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("create trigger");

        let first = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("first batch");
        assert_eq!(first.total_analyzed, 0);
        assert_eq!(first.errors.len(), 1);
        assert!(first.errors[0].contains("disk full"));
        assert!(candidates.list_event_candidates("alice", 50).expect("events").is_empty());

        connection
            .execute_batch("DROP TRIGGER reject_history")
            .expect("drop trigger");

        let second = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("second batch");
        assert_eq!(second.total_analyzed, 1);
        assert_eq!(second.total_saved, 1);
        assert_eq!(candidates.list_event_candidates("alice", 50).expect("events").len(), 1);

        let third = service
            .analyze_recent_emails("alice", "token", 10)
            .await
            .expect("third batch");
        assert_eq!(third.skipped_already_analyzed, 1);
        assert_eq!(candidates.list_event_candidates("alice", 50).expect("events").len(), 1);
    }
}
