use crate::domain::models::{AnalysisResult, EventCandidate, ExtractionRequest, Priority, TaskCandidate};
use chrono::{Days, NaiveDateTime, NaiveTime};

pub const MEETING_KEYWORDS: [&str; 3] = ["会議", "ミーティング", "meeting"];
pub const TASK_KEYWORDS: [&str; 4] = ["タスク", "todo", "依頼", "お願い"];

pub const HEURISTIC_EVENT_CONFIDENCE: f64 = 0.8;
pub const HEURISTIC_TASK_CONFIDENCE: f64 = 0.7;
pub const HEURISTIC_OVERALL_CONFIDENCE: f64 = 0.6;

const PLACEHOLDER_TASK_DUE_DAYS: u64 = 7;

/// Keyword-based extraction used when no language model is available.
///
/// Only the subject is inspected. Dates are placeholders relative to `now`:
/// events start tomorrow at 10:00 and last an hour, tasks are due a week
/// from today at 23:59:59.
pub fn heuristic_analysis(request: &ExtractionRequest, now: NaiveDateTime) -> AnalysisResult {
    let subject = request.subject.to_lowercase();
    let mut tasks = Vec::new();
    let mut events = Vec::new();

    if contains_any(&subject, &MEETING_KEYWORDS) {
        let start = now
            .date()
            .checked_add_days(Days::new(1))
            .unwrap_or(now.date())
            .and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default());
        events.push(EventCandidate {
            title: format!("Attend: {}", request.subject.trim()),
            description: format!("Meeting invitation from {}", request.sender),
            start,
            end: start + chrono::Duration::hours(1),
            location: "TBD".to_string(),
            confidence: HEURISTIC_EVENT_CONFIDENCE,
        });
    }

    if contains_any(&subject, &TASK_KEYWORDS) {
        let due_date = now
            .date()
            .checked_add_days(Days::new(PLACEHOLDER_TASK_DUE_DAYS))
            .unwrap_or(now.date())
            .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default());
        tasks.push(TaskCandidate {
            title: format!("Follow up: {}", request.subject.trim()),
            description: format!("Request from {}", request.sender),
            due_date: Some(due_date),
            priority: Priority::Medium,
            confidence: HEURISTIC_TASK_CONFIDENCE,
        });
    }

    AnalysisResult {
        tasks,
        events,
        overall_confidence: HEURISTIC_OVERALL_CONFIDENCE,
    }
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}
