//! Minimal OpenAI REST API client.
//!
//! Chat completions and embeddings only, with token usage and wall-clock
//! latency surfaced on every call so callers can do cost accounting.
//! Rate limits (HTTP 429) map to a typed error carrying the Retry-After
//! delay when the API provides one.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{OpenAIClient, ChatRequest, Message};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! let response = client.chat_completion(
//!     ChatRequest::new("gpt-4o-mini")
//!         .message(Message::system("You are terse."))
//!         .message(Message::user("Hello!"))
//!         .max_tokens(64),
//! ).await?;
//! println!("{} ({:?} tokens)", response.content, response.usage);
//!
//! let embedding = client.create_embedding("text to embed", "text-embedding-3-small").await?;
//! println!("{} dims, {} tokens", embedding.embedding.len(), embedding.prompt_tokens);
//! ```

pub mod error;
pub mod types;

pub use error::{OpenAIError, Result};
pub use types::*;

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, warn};

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for Azure, proxies, compatible APIs).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                OpenAIError::Network(e.to_string())
            })?;

        let response = check_status(response).await?;

        let chat_response: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OpenAIError::Api("No response from OpenAI".into()))?;

        let latency = start.elapsed();
        debug!(
            model = %request.model,
            duration_ms = latency.as_millis() as u64,
            prompt_tokens = chat_response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens = chat_response.usage.as_ref().map(|u| u.completion_tokens),
            "OpenAI chat completion"
        );

        Ok(ChatResponse {
            content,
            usage: chat_response.usage,
            latency,
        })
    }

    /// Create an embedding for a text.
    pub async fn create_embedding(&self, text: &str, model: &str) -> Result<EmbeddingResult> {
        let start = Instant::now();
        let request = types::EmbeddingRequest {
            model: model.to_string(),
            input: text.to_string(),
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Embedding request failed");
                OpenAIError::Network(e.to_string())
            })?;

        let response = check_status(response).await?;

        let parsed: types::EmbeddingResponseRaw = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let prompt_tokens = parsed.usage.map(|u| u.prompt_tokens).unwrap_or(0);
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OpenAIError::Api("No embedding from OpenAI".into()))?;

        Ok(EmbeddingResult {
            embedding,
            prompt_tokens,
            latency: start.elapsed(),
        })
    }

    /// Create embeddings for multiple texts, sequentially.
    pub async fn create_embeddings_batch(
        &self,
        texts: &[&str],
        model: &str,
    ) -> Result<Vec<EmbeddingResult>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.create_embedding(text, model).await?);
        }
        Ok(results)
    }
}

/// Map non-success statuses, surfacing 429 with its Retry-After delay.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        warn!(?retry_after, "OpenAI rate limited");
        return Err(OpenAIError::RateLimited { retry_after });
    }

    let error_text = response.text().await.unwrap_or_default();
    warn!(status = %status, error = %error_text, "OpenAI API error");
    Err(OpenAIError::Api(format!("HTTP {status}: {error_text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = OpenAIClient::new("sk-test").with_base_url("https://custom.api.com");
        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url(), "https://custom.api.com");
    }
}
