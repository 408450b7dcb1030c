//! Error kinds shared by the engine, stores and presentation layers.

use thiserror::Error;

/// Rejections raised before a run starts. No run state is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("an API key is required")]
    MissingCredential,

    #[error("a prompt template must be selected")]
    MissingTemplate,

    #[error("duplicate topic id {0} in queue")]
    DuplicateTopicId(i64),

    #[error("invalid topic list: {0}")]
    InvalidTopics(String),

    #[error("input must not be empty")]
    EmptyInput,

    #[error("a run is already in progress")]
    AlreadyRunning,
}

/// Failures reported by a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid API key")]
    InvalidCredential,

    #[error("network error: {0}")]
    Network(String),

    #[error("the model returned an empty response")]
    EmptyResponse,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    pub fn is_invalid_credential(&self) -> bool {
        matches!(self, ProviderError::InvalidCredential)
    }
}

/// Model output that does not match the requested JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("missing keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("unexpected keys: {}", .0.join(", "))]
    UnexpectedKeys(Vec<String>),
}

/// Reasons a run ends in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("malformed model output for topic {topic_id}: {source}")]
    MalformedOutput {
        topic_id: i64,
        #[source]
        source: OutputError,
    },

    #[error("failed to save history: {0}")]
    Persistence(String),

    #[error("run task failed: {0}")]
    Internal(String),
}

impl RunFailure {
    pub fn is_invalid_credential(&self) -> bool {
        matches!(self, RunFailure::Provider(e) if e.is_invalid_credential())
    }
}

/// Errors from the JSON-file stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: malformed JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.display().to_string(),
            source,
        }
    }
}

pub(crate) fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}
