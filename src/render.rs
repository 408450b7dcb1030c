//! Prompt composition and model-output cleanup.
//!
//! Everything here is pure: no I/O, and `render` never fails.

use crate::error::OutputError;
use crate::model::{PromptTemplate, ResponseFormat, Topic};

/// Placeholder replaced by the topic description inside template content.
pub const TOPIC_PLACEHOLDER: &str = "{{topic}}";

const FENCE: &str = "```";

/// Human-readable description of a topic.
pub fn subject_for(topic: &Topic) -> String {
    format!("{} ({}): {}", topic.name, topic.period, topic.topic)
}

/// Build the request text for one topic.
pub fn render(topic: &Topic, template: &PromptTemplate) -> String {
    render_subject(&subject_for(topic), template)
}

/// Build the request text for a free-form subject.
pub fn render_subject(subject: &str, template: &PromptTemplate) -> String {
    let mut out = if template.content.contains(TOPIC_PLACEHOLDER) {
        template.content.replace(TOPIC_PLACEHOLDER, subject)
    } else if template.content.trim().is_empty() {
        subject.to_string()
    } else {
        format!("{subject}\n\n{}", template.content)
    };

    if !template.columns.is_empty() {
        out.push_str("\n\nInclude the following properties: ");
        out.push_str(&template.columns.join(", "));
    }

    if template.response_format == ResponseFormat::Json {
        out.push_str("\n\n");
        out.push_str(&json_instruction(&template.columns));
        // User text may itself carry fence markers; none may reach the model.
        if out.contains(FENCE) {
            out = out.replace(FENCE, "'''");
        }
    }

    out
}

fn json_instruction(columns: &[String]) -> String {
    if columns.is_empty() {
        return "Reply with a single JSON object only. Do not add any explanation before or \
                after it, and do not wrap it in Markdown code fences."
            .to_string();
    }
    let keys = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Reply with a single JSON object whose keys are exactly: {keys}. Do not add any \
         other keys, do not add any explanation before or after it, and do not wrap it in \
         Markdown code fences."
    )
}

/// Remove one surrounding code fence (with or without a language tag).
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let mut body = trimmed;

    if let Some(rest) = body.strip_prefix(FENCE) {
        // Drop the info string (e.g. "json") up to the end of the fence line.
        body = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix(FENCE) {
        body = rest;
    }

    body.trim().to_string()
}

/// Check that cleaned output is a JSON object with exactly the requested keys.
pub fn validate_json_output(
    text: &str,
    columns: &[String],
) -> Result<serde_json::Map<String, serde_json::Value>, OutputError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| OutputError::NotJson(e.to_string()))?;
    let serde_json::Value::Object(map) = value else {
        return Err(OutputError::NotAnObject);
    };
    if columns.is_empty() {
        return Ok(map);
    }

    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !map.contains_key(c.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(OutputError::MissingKeys(missing));
    }
    let unexpected: Vec<String> = map
        .keys()
        .filter(|k| !columns.iter().any(|c| c == *k))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(OutputError::UnexpectedKeys(unexpected));
    }
    Ok(map)
}
