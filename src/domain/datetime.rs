use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const DEFAULT_HOUR: u32 = 9;

#[derive(Debug, Clone, Copy)]
enum Pattern {
    DateTime(&'static str),
    DateOnly(&'static str),
}

// Order matters: the first pattern that matches wins, so an input such as
// "03/04/2025" is always read as March 4th even when April 3rd was meant.
const PATTERNS: [Pattern; 9] = [
    Pattern::DateTime("%Y-%m-%dT%H:%M:%S"),
    Pattern::DateTime("%Y-%m-%d %H:%M:%S"),
    Pattern::DateTime("%Y-%m-%dT%H:%M"),
    Pattern::DateTime("%Y-%m-%d %H:%M"),
    Pattern::DateOnly("%Y-%m-%d"),
    Pattern::DateTime("%m/%d/%Y %H:%M"),
    Pattern::DateOnly("%m/%d/%Y"),
    Pattern::DateTime("%d/%m/%Y %H:%M"),
    Pattern::DateOnly("%d/%m/%Y"),
];

/// Outcome of reading a free-form date/time value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDateTime {
    Absent,
    Parsed(NaiveDateTime),
    Unparsed(String),
}

/// What to do with a date value that none of the known patterns accept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnparsedDatePolicy {
    #[default]
    Absent,
    Now,
}

impl ParsedDateTime {
    pub fn resolve<F>(self, policy: UnparsedDatePolicy, now: F) -> Option<NaiveDateTime>
    where
        F: FnOnce() -> NaiveDateTime,
    {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Absent => None,
            Self::Unparsed(_) => match policy {
                UnparsedDatePolicy::Absent => None,
                UnparsedDatePolicy::Now => Some(now()),
            },
        }
    }
}

pub fn parse_datetime(input: Option<&str>) -> ParsedDateTime {
    let Some(raw) = input.map(str::trim).filter(|value| !value.is_empty()) else {
        return ParsedDateTime::Absent;
    };

    for pattern in PATTERNS {
        let parsed = match pattern {
            Pattern::DateTime(format) => NaiveDateTime::parse_from_str(raw, format).ok(),
            Pattern::DateOnly(format) => NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|date| date.and_hms_opt(DEFAULT_HOUR, 0, 0)),
        };
        if let Some(value) = parsed {
            return ParsedDateTime::Parsed(value);
        }
    }

    // Offsets are dropped; the wall-clock time the sender wrote is kept.
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return ParsedDateTime::Parsed(value.naive_local());
    }

    ParsedDateTime::Unparsed(raw.to_string())
}

/// Normalizes a date/time string, treating anything unreadable as absent.
pub fn normalize_datetime(input: Option<&str>) -> Option<NaiveDateTime> {
    match parse_datetime(input) {
        ParsedDateTime::Parsed(value) => Some(value),
        ParsedDateTime::Absent | ParsedDateTime::Unparsed(_) => None,
    }
}

pub fn format_canonical(value: &NaiveDateTime) -> String {
    value.format(CANONICAL_FORMAT).to_string()
}

pub mod canonical {
    use super::{format_canonical, parse_datetime, ParsedDateTime};
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_canonical(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match parse_datetime(Some(&raw)) {
            ParsedDateTime::Parsed(value) => Ok(value),
            _ => Err(de::Error::custom(format!("invalid timestamp '{raw}'"))),
        }
    }
}

pub mod canonical_option {
    use super::{format_canonical, parse_datetime, ParsedDateTime};
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&format_canonical(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match parse_datetime(raw.as_deref()) {
            ParsedDateTime::Parsed(value) => Ok(Some(value)),
            ParsedDateTime::Absent => Ok(None),
            ParsedDateTime::Unparsed(raw) => {
                Err(de::Error::custom(format!("invalid timestamp '{raw}'")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, CANONICAL_FORMAT).expect("valid canonical timestamp")
    }

    #[test]
    fn date_only_defaults_to_nine_am() {
        assert_eq!(
            normalize_datetime(Some("2025-03-01")),
            Some(at("2025-03-01T09:00:00"))
        );
        assert_eq!(
            normalize_datetime(Some("12/25/2025")),
            Some(at("2025-12-25T09:00:00"))
        );
    }

    #[test]
    fn empty_input_is_absent() {
        assert_eq!(parse_datetime(None), ParsedDateTime::Absent);
        assert_eq!(parse_datetime(Some("")), ParsedDateTime::Absent);
        assert_eq!(parse_datetime(Some("   ")), ParsedDateTime::Absent);
        assert_eq!(normalize_datetime(Some("")), None);
    }

    #[test]
    fn accepts_time_variants() {
        assert_eq!(
            normalize_datetime(Some("2025-03-01T10:30:15")),
            Some(at("2025-03-01T10:30:15"))
        );
        assert_eq!(
            normalize_datetime(Some("2025-03-01 10:30:15")),
            Some(at("2025-03-01T10:30:15"))
        );
        assert_eq!(
            normalize_datetime(Some("2025-03-01T10:30")),
            Some(at("2025-03-01T10:30:00"))
        );
        assert_eq!(
            normalize_datetime(Some("2025-03-01 10:30")),
            Some(at("2025-03-01T10:30:00"))
        );
        assert_eq!(
            normalize_datetime(Some("03/01/2025 14:00")),
            Some(at("2025-03-01T14:00:00"))
        );
    }

    #[test]
    fn month_first_reading_wins_for_ambiguous_dates() {
        assert_eq!(
            normalize_datetime(Some("03/04/2025")),
            Some(at("2025-03-04T09:00:00"))
        );
        // Only valid as day-first, so the later pattern picks it up.
        assert_eq!(
            normalize_datetime(Some("25/12/2025")),
            Some(at("2025-12-25T09:00:00"))
        );
        assert_eq!(
            normalize_datetime(Some("25/12/2025 18:45")),
            Some(at("2025-12-25T18:45:00"))
        );
    }

    #[test]
    fn rfc3339_keeps_wall_clock_time() {
        assert_eq!(
            normalize_datetime(Some("2025-03-01T10:00:00+09:00")),
            Some(at("2025-03-01T10:00:00"))
        );
        assert_eq!(
            normalize_datetime(Some("2025-03-01T10:00:00Z")),
            Some(at("2025-03-01T10:00:00"))
        );
    }

    #[test]
    fn unreadable_input_is_reported_not_fabricated() {
        assert_eq!(
            parse_datetime(Some("next Tuesday")),
            ParsedDateTime::Unparsed("next Tuesday".to_string())
        );
        assert_eq!(normalize_datetime(Some("next Tuesday")), None);

        let now = at("2026-01-01T08:00:00");
        assert_eq!(
            parse_datetime(Some("soon")).resolve(UnparsedDatePolicy::Now, || now),
            Some(now)
        );
        assert_eq!(
            parse_datetime(Some("soon")).resolve(UnparsedDatePolicy::Absent, || now),
            None
        );
    }

    proptest! {
        #[test]
        fn canonical_output_parses_back_to_itself(
            year in 1970i32..2100i32,
            ordinal in 1u32..365u32,
            seconds in 0u32..86_400u32
        ) {
            let date = NaiveDate::from_yo_opt(year, ordinal).expect("valid ordinal date");
            let value = date.and_hms_opt(seconds / 3600, (seconds / 60) % 60, seconds % 60)
                .expect("valid time");
            let rendered = format_canonical(&value);
            prop_assert_eq!(normalize_datetime(Some(&rendered)), Some(value));
        }
    }
}
