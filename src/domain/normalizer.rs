use crate::domain::datetime::{parse_datetime, ParsedDateTime, UnparsedDatePolicy};
use crate::domain::models::{
    clamp_confidence, AnalysisResult, EventCandidate, Priority, TaskCandidate,
};
use crate::domain::response_parser::RawExtraction;
use chrono::{Duration, Local, NaiveDateTime};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const DEFAULT_EVENT_DURATION_MINUTES: i64 = 60;

/// Wall-clock "now" in the user's timezone.
pub type LocalNowProvider = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Converts loosely-typed model output into validated candidates.
pub struct ResultNormalizer {
    unparsed_date_policy: UnparsedDatePolicy,
    now_provider: LocalNowProvider,
}

impl Default for ResultNormalizer {
    fn default() -> Self {
        Self::new(UnparsedDatePolicy::default())
    }
}

impl ResultNormalizer {
    pub fn new(unparsed_date_policy: UnparsedDatePolicy) -> Self {
        Self {
            unparsed_date_policy,
            now_provider: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_now_provider(mut self, now_provider: LocalNowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn normalize(&self, raw: &RawExtraction) -> AnalysisResult {
        let tasks = entries(raw.get("tasks"))
            .filter_map(|entry| self.normalize_task(entry))
            .collect();
        let events = entries(raw.get("events"))
            .filter_map(|entry| self.normalize_event(entry))
            .collect();
        let overall_confidence =
            coerce_confidence(raw.get("overall_confidence").or_else(|| raw.get("confidence")));

        AnalysisResult {
            tasks,
            events,
            overall_confidence,
        }
    }

    fn normalize_task(&self, entry: &Map<String, Value>) -> Option<TaskCandidate> {
        let title = title_of(entry)?;
        Some(TaskCandidate {
            title,
            description: text_of(entry, "description"),
            due_date: self.resolve_date(entry.get("due_date")),
            priority: entry
                .get("priority")
                .and_then(Value::as_str)
                .map(Priority::parse_lenient)
                .unwrap_or_default(),
            confidence: coerce_confidence(entry.get("confidence")),
        })
    }

    fn normalize_event(&self, entry: &Map<String, Value>) -> Option<EventCandidate> {
        let title = title_of(entry)?;
        let start = self.resolve_date(entry.get("start"))?;
        let end = self
            .resolve_date(entry.get("end"))
            .filter(|end| *end >= start)
            .unwrap_or_else(|| start + Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES));

        Some(EventCandidate {
            title,
            description: text_of(entry, "description"),
            start,
            end,
            location: text_of(entry, "location"),
            confidence: coerce_confidence(entry.get("confidence")),
        })
    }

    fn resolve_date(&self, value: Option<&Value>) -> Option<NaiveDateTime> {
        let parsed = match value {
            Some(Value::String(raw)) => parse_datetime(Some(raw)),
            Some(Value::Null) | None => ParsedDateTime::Absent,
            Some(other) => ParsedDateTime::Unparsed(other.to_string()),
        };
        parsed.resolve(self.unparsed_date_policy, || (self.now_provider)())
    }
}

/// Reads a confidence value; numbers and numeric strings are clamped to
/// [0, 1], anything else is 0.0.
pub fn coerce_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.map(clamp_confidence).unwrap_or(0.0)
}

fn entries(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn title_of(entry: &Map<String, Value>) -> Option<String> {
    entry
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(ToOwned::to_owned)
}

fn text_of(entry: &Map<String, Value>, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
