//! Generation Client
//!
//! Wraps the external chat model behind the [`GenerationClient`] capability.
//! Transient provider errors (rate limits, 5xx, transport) retry with
//! exponential backoff: the initial attempt plus at most three retries,
//! delayed 1s, 2s, 4s; each attempt bounded by a 30 second timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::services::embedding::is_retryable_status;

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before each retry; the schedule's length bounds the retry count.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider failed after all retries; surfaces as `upstream_unavailable`.
    #[error("chat provider unavailable: {0}")]
    Unavailable(String),

    #[error("chat provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Capability for turning an assembled prompt into answer text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str, params: GenerationParams)
        -> Result<String, GenerationError>;
}

// ============================================================================
// OpenAI-compatible chat-completions implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiGenerationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerationClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    async fn request_once(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, RequestFailure> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let response = tokio::time::timeout(ATTEMPT_TIMEOUT, send)
            .await
            .map_err(|_| RequestFailure::Retryable("attempt timed out after 30s".to_string()))?
            .map_err(|e| RequestFailure::Retryable(format!("transport error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("chat provider error ({status}): {text}");
            return if is_retryable_status(status.as_u16()) {
                Err(RequestFailure::Retryable(message))
            } else {
                Err(RequestFailure::Fatal(message))
            };
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Fatal(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| RequestFailure::Fatal("no completion returned".to_string()))
    }
}

enum RequestFailure {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        let mut last_error = String::new();

        // Initial attempt plus one retry per BACKOFF entry.
        for attempt in 0..=BACKOFF.len() {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF[attempt - 1]).await;
            }
            match self.request_once(prompt, params).await {
                Ok(text) => return Ok(text),
                Err(RequestFailure::Fatal(message)) => {
                    warn!(attempt = attempt + 1, error = %message, "generation failed");
                    return Err(GenerationError::InvalidResponse(message));
                }
                Err(RequestFailure::Retryable(message)) => {
                    warn!(attempt = attempt + 1, error = %message, "generation failed, will retry");
                    last_error = message;
                }
            }
        }

        Err(GenerationError::Unavailable(last_error))
    }
}
