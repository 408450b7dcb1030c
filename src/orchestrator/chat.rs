//! Single-shot chat: one request, one history record.

use crate::engine::CompletionProvider;
use crate::error::{ProviderError, StoreError, ValidationError};
use crate::model::{HistoryRecord, PromptTemplate, ResponseFormat};
use crate::render;
use crate::storage::HistoryStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to save history: {0}")]
    Store(#[from] StoreError),
}

/// Send `input` (optionally wrapped in `template`) and persist the reply.
pub(crate) async fn chat_once(
    provider: &dyn CompletionProvider,
    history: &HistoryStore,
    input: &str,
    template: Option<&PromptTemplate>,
    credential: &str,
) -> Result<HistoryRecord, ChatError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ValidationError::EmptyInput.into());
    }
    if credential.trim().is_empty() {
        return Err(ValidationError::MissingCredential.into());
    }

    let (prompt, prompt_content) = match template {
        Some(t) => (render::render_subject(input, t), t.content.clone()),
        None => (input.to_string(), String::new()),
    };

    let completion = provider.complete(&prompt, credential).await?;
    let text = match template {
        Some(t) if t.response_format == ResponseFormat::Json => {
            render::strip_code_fences(&completion.text)
        }
        _ => completion.text.trim().to_string(),
    };

    let record = HistoryRecord::new(input.to_string(), text, prompt_content);
    let store = history.clone();
    let to_save = record.clone();
    tokio::task::spawn_blocking(move || store.append(to_save))
        .await
        .map_err(|e| StoreError::Invalid(format!("write task failed: {e}")))??;
    tracing::info!(id = %record.id, "chat reply saved");
    Ok(record)
}
