use super::provider::{Completion, CompletionProvider};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.7,
            max_tokens: 2048,
            request_timeout: None,
            user_agent: format!("promptdeck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    cfg: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(cfg.user_agent.clone());
        if let Some(t) = cfg.request_timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str, credential: &str) -> Result<Completion, ProviderError> {
        let req = ChatRequest {
            model: &self.cfg.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };

        tracing::debug!(model = %self.cfg.model, prompt_len = prompt.len(), "sending completion request");
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(credential)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("decode response: {e}")))?;
        extract_text(parsed)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::UNAUTHORIZED {
        return ProviderError::InvalidCredential;
    }
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        });
    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}

fn extract_text(resp: ChatResponse) -> Result<Completion, ProviderError> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)?;
    Ok(Completion { text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_invalid_credential() {
        let e = classify_failure(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(e, ProviderError::InvalidCredential);
    }

    #[test]
    fn other_statuses_keep_api_message() {
        let e = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached"}}"#,
        );
        assert_eq!(
            e,
            ProviderError::Api {
                status: 429,
                message: "Rate limit reached".into()
            }
        );
        let e = classify_failure(StatusCode::BAD_GATEWAY, "");
        assert_eq!(
            e,
            ProviderError::Api {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }

    #[test]
    fn first_choice_content_is_returned() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hello"}},{"message":{"content":"second"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(resp).unwrap().text, "hello");
    }

    #[test]
    fn missing_or_blank_content_is_empty_response() {
        let none: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(extract_text(none), Err(ProviderError::EmptyResponse));
        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert_eq!(extract_text(blank), Err(ProviderError::EmptyResponse));
        let null: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(extract_text(null), Err(ProviderError::EmptyResponse));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let p = OpenAiProvider::new(OpenAiConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(p.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
