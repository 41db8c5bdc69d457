use crate::domain::models::ExtractionRequest;

const OUTPUT_SCHEMA: &str = r#"{
  "tasks": [
    {
      "title": "short task title",
      "description": "what needs to be done",
      "due_date": "YYYY-MM-DDTHH:MM:SS (only when a deadline is stated)",
      "priority": "high|medium|low",
      "confidence": 0.0
    }
  ],
  "events": [
    {
      "title": "short event title",
      "description": "what the event is about",
      "start": "YYYY-MM-DDTHH:MM:SS",
      "end": "YYYY-MM-DDTHH:MM:SS",
      "location": "where it takes place, if known",
      "confidence": 0.0
    }
  ],
  "overall_confidence": 0.0
}"#;

/// Builds the extraction instructions for one email.
pub fn build_analysis_prompt(request: &ExtractionRequest) -> String {
    format!(
        "Analyze the following email and extract tasks (to-dos) and events (scheduled items).\n\
         \n\
         [Email]\n\
         Sender: {sender}\n\
         Subject: {subject}\n\
         Body:\n\
         {body}\n\
         \n\
         [Categories]\n\
         1. Task: work the recipient has to carry out, usually with a deadline. \
         Fields: title, description, due_date, priority, confidence.\n\
         2. Event: a meeting, call, seminar or other item happening at a specific date and time. \
         Fields: title, description, start, end, location, confidence.\n\
         \n\
         [Output format]\n\
         Respond with JSON only, using exactly these field names:\n\
         {schema}\n\
         \n\
         [Rules]\n\
         - Write dates as YYYY-MM-DDTHH:MM:SS.\n\
         - confidence and overall_confidence are numbers between 0.0 and 1.0.\n\
         - If no tasks or events are found, return empty arrays.\n\
         - Do not include any text outside the JSON object.\n",
        sender = request.sender,
        subject = request.subject,
        body = request.email_body,
        schema = OUTPUT_SCHEMA,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_email_fields_verbatim() {
        let request = ExtractionRequest::new(
            "Please review the draft by Friday.\nThanks!",
            "alice@example.com",
            "Draft review {urgent}",
        );
        let prompt = build_analysis_prompt(&request);

        assert!(prompt.contains("Sender: alice@example.com"));
        assert!(prompt.contains("Subject: Draft review {urgent}"));
        assert!(prompt.contains("Please review the draft by Friday.\nThanks!"));
    }

    #[test]
    fn prompt_names_every_output_field() {
        let prompt = build_analysis_prompt(&ExtractionRequest::new("body", "sender", "subject"));
        for field in [
            "\"tasks\"",
            "\"events\"",
            "\"title\"",
            "\"description\"",
            "\"due_date\"",
            "\"priority\"",
            "\"start\"",
            "\"end\"",
            "\"location\"",
            "\"confidence\"",
            "\"overall_confidence\"",
        ] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("JSON only"));
        assert!(prompt.contains("empty arrays"));
    }

    #[test]
    fn prompt_handles_empty_inputs() {
        let prompt = build_analysis_prompt(&ExtractionRequest::new("", "", ""));
        assert!(prompt.contains("Sender: \n"));
        assert!(prompt.contains("Subject: \n"));
        assert!(prompt.contains("\"overall_confidence\""));
    }
}
