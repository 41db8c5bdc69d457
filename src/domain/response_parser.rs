use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON object found in model response")]
    MissingJson,
    #[error("invalid JSON in model response: {0}")]
    InvalidJson(String),
}

/// Untyped payload decoded from a model response, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction(pub Value);

impl RawExtraction {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// Decodes the span from the first `{` to the last `}` of `raw_text`.
pub fn parse_response(raw_text: &str) -> Result<RawExtraction, ParseError> {
    let start = raw_text.find('{').ok_or(ParseError::MissingJson)?;
    let end = raw_text.rfind('}').ok_or(ParseError::MissingJson)?;
    if end < start {
        return Err(ParseError::MissingJson);
    }

    let candidate = &raw_text[start..=end];
    serde_json::from_str::<Value>(candidate)
        .map(RawExtraction)
        .map_err(|error| ParseError::InvalidJson(error.to_string()))
}
