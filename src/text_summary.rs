//! Text summary builder for CLI output.
//!
//! Formats the human-readable lines printed after a batch run in text mode.

use crate::model::{HistoryRecord, PromptTemplate, ResponseFormat, RunOutcome, RunStatus};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from the outcome and the records the run saved.
pub(crate) fn build_text_summary(
    template: &PromptTemplate,
    outcome: &RunOutcome,
    records: &[HistoryRecord],
) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Template: {} ({})", template.name, template.id));
    lines.push(format!(
        "Status:   {} ({}/{} topics)",
        outcome.status.label(),
        outcome.cursor,
        outcome.total
    ));
    if let RunStatus::Failed(failure) = &outcome.status {
        lines.push(format!("Error:    {failure}"));
    }

    for r in records {
        let title = match template.response_format {
            ResponseFormat::Json => json_title(&r.response),
            ResponseFormat::Text => None,
        };
        match title {
            Some(t) => lines.push(format!("  {}  {}: {}", r.timestamp, r.prompt, t)),
            None => lines.push(format!("  {}  {}", r.timestamp, r.prompt)),
        }
    }

    if let Some(unsaved) = outcome.unsaved.as_ref() {
        lines.push(format!(
            "Unsaved reply for '{}' (history write failed):",
            unsaved.prompt
        ));
        lines.push(unsaved.response.clone());
    }

    TextSummary { lines }
}

/// `title` property of a JSON reply, when there is one.
fn json_title(response: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(response).ok()?;
    value.get("title")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, RunFailure};

    fn template() -> PromptTemplate {
        PromptTemplate {
            id: "1".into(),
            name: "Essay".into(),
            content: "c".into(),
            response_format: ResponseFormat::Json,
            columns: vec!["title".into()],
            updated_at: None,
        }
    }

    fn record(prompt: &str, response: &str) -> HistoryRecord {
        HistoryRecord {
            id: "x".into(),
            timestamp: "2025-07-02 10:15:00".into(),
            prompt: prompt.into(),
            response: response.into(),
            prompt_content: "c".into(),
        }
    }

    #[test]
    fn lists_titles_for_json_replies() {
        let outcome = RunOutcome {
            status: RunStatus::Completed,
            cursor: 2,
            total: 2,
            completed_ids: [1, 2].into_iter().collect(),
            unsaved: None,
        };
        let records = [
            record("Socrates", r#"{"title":"The gadfly"}"#),
            record("Plato", "not json"),
        ];
        let s = build_text_summary(&template(), &outcome, &records);
        assert_eq!(s.lines[1], "Status:   completed (2/2 topics)");
        assert!(s.lines[2].ends_with("Socrates: The gadfly"));
        assert!(s.lines[3].ends_with("Plato"));
    }

    #[test]
    fn failure_and_unsaved_reply_are_reported() {
        let outcome = RunOutcome {
            status: RunStatus::Failed(RunFailure::Provider(ProviderError::InvalidCredential)),
            cursor: 0,
            total: 3,
            completed_ids: Default::default(),
            unsaved: Some(record("Kant", "reply")),
        };
        let s = build_text_summary(&template(), &outcome, &[]);
        assert!(s.lines.iter().any(|l| l == "Error:    Invalid API key"));
        assert!(s.lines.iter().any(|l| l.contains("Unsaved reply for 'Kant'")));
        assert_eq!(s.lines.last().map(String::as_str), Some("reply"));
    }
}
