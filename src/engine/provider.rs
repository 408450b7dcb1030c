use crate::error::ProviderError;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
}

/// A chat-completion backend: one user message in, one text reply out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, credential: &str) -> Result<Completion, ProviderError>;
}
