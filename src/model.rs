use crate::error::RunFailure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// One unit of work in a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub period: String,
    pub topic: String,
}

impl Topic {
    /// Short label used in lists and as the history record's prompt.
    pub fn label(&self) -> String {
        format!("{} - {}", self.name, self.period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    #[serde(other)]
    Text,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            other => Err(format!("unknown response format '{other}' (expected json or text)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    // Documents written before records carried ids are patched on load.
    #[serde(default)]
    pub id: String,
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub prompt_content: String,
}

impl HistoryRecord {
    pub fn new(prompt: String, response: String, prompt_content: String) -> Self {
        Self {
            id: gen_record_id(),
            timestamp: local_timestamp(),
            prompt,
            response,
            prompt_content,
        }
    }
}

/// Generate a random record id.
pub fn gen_record_id() -> String {
    use rand::RngCore;
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Local wall-clock timestamp, falling back to UTC when the offset is unknown.
pub fn local_timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| "now".into())
}

/// Tunables for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub strict_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            strict_output: false,
        }
    }
}

/// Everything a run needs, handed over at start time.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub queue: Vec<Topic>,
    pub template: Option<PromptTemplate>,
    pub credential: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub current_topic: Option<Topic>,
    pub completed_ids: BTreeSet<i64>,
    pub cursor: usize,
    pub total: usize,
}

impl RunProgress {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.cursor as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed(#[serde(serialize_with = "crate::error::serialize_display")] RunFailure),
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed(_) => "failed",
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub cursor: usize,
    pub total: usize,
    pub completed_ids: BTreeSet<i64>,
    /// Result generated but not persisted because the history write failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsaved: Option<HistoryRecord>,
}

/// Runner lifecycle as seen by presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        total: usize,
    },
    TopicStarted {
        index: usize,
        topic: Topic,
    },
    TopicCompleted {
        index: usize,
        // Box to keep RunEvent small; records carry whole model responses.
        record: Box<HistoryRecord>,
    },
    Progress(RunProgress),
    Info(InfoEvent),
    RunFinished {
        outcome: Box<RunOutcome>,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    // UI/CLI messages generated outside the engine.
    Message(String),
    Waiting { seconds: u64 },
    Rejected(String),
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Waiting { seconds } => format!("Waiting {seconds}s before next topic"),
            InfoEvent::Rejected(reason) => format!("Cannot start: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_reads_desktop_field_names() {
        let raw = r#"{
            "id": "1",
            "name": "Essay",
            "content": "Write an essay.",
            "responseFormat": "json",
            "columns": ["title", "content"],
            "updatedAt": 1751424560133
        }"#;
        let t: PromptTemplate = serde_json::from_str(raw).unwrap();
        assert_eq!(t.response_format, ResponseFormat::Json);
        assert_eq!(t.columns, vec!["title", "content"]);
        assert_eq!(t.updated_at, Some(1751424560133));
    }

    #[test]
    fn unknown_response_format_reads_as_text() {
        let raw = r#"{"id":"2","name":"n","content":"c","responseFormat":"markdown"}"#;
        let t: PromptTemplate = serde_json::from_str(raw).unwrap();
        assert_eq!(t.response_format, ResponseFormat::Text);
        assert!(t.columns.is_empty());
    }

    #[test]
    fn topic_requires_all_fields() {
        let ok: Result<Vec<Topic>, _> =
            serde_json::from_str(r#"[{"id":1,"name":"A","period":"p","topic":"t"}]"#);
        assert!(ok.is_ok());
        let missing: Result<Vec<Topic>, _> =
            serde_json::from_str(r#"[{"id":1,"name":"A","topic":"t"}]"#);
        assert!(missing.is_err());
        let wrong_type: Result<Vec<Topic>, _> =
            serde_json::from_str(r#"[{"id":"1","name":"A","period":"p","topic":"t"}]"#);
        assert!(wrong_type.is_err());
    }

    #[test]
    fn topic_ids_may_be_negative() {
        let topics: Vec<Topic> =
            serde_json::from_str(r#"[{"id":-3,"name":"A","period":"p","topic":"t"}]"#).unwrap();
        assert_eq!(topics[0].id, -3);
    }

    #[test]
    fn progress_ratio_handles_empty_queue() {
        let p = RunProgress::default();
        assert_eq!(p.ratio(), 0.0);
        let p = RunProgress {
            cursor: 1,
            total: 4,
            ..Default::default()
        };
        assert!((p.ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn history_record_ids_are_distinct() {
        let a = HistoryRecord::new("a".into(), "r".into(), "c".into());
        let b = HistoryRecord::new("a".into(), "r".into(), "c".into());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
    }
}
