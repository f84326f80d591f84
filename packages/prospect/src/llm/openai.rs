//! OpenAI-backed [`LlmProvider`] (enabled by the `openai` feature).

use std::time::Duration;

use async_trait::async_trait;
use openai_client::{ChatRequest, Message, OpenAIClient, OpenAIError};

use crate::error::{LlmError, LlmResult};
use crate::security::ProviderCredentials;

use super::{Completion, CompletionRequest, Embedding, LlmProvider};

/// OpenAI chat + embeddings provider.
pub struct OpenAiProvider {
    client: OpenAIClient,
    call_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(credentials: &ProviderCredentials) -> Self {
        let mut client = OpenAIClient::new(credentials.api_key.expose());
        if let Some(base_url) = &credentials.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Self {
            client,
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Create from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        let client = OpenAIClient::from_env().map_err(map_error)?;
        Ok(Self {
            client,
            call_timeout: Duration::from_secs(60),
        })
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

fn map_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::RateLimited { retry_after } => LlmError::RateLimited { retry_after },
        other => LlmError::Provider(other.to_string()),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
        let mut chat = ChatRequest::new(&request.model)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens);
        if let Some(system) = &request.system {
            chat = chat.message(Message::system(system));
        }
        chat = chat.message(Message::user(&request.prompt));

        let response = tokio::time::timeout(self.call_timeout, self.client.chat_completion(chat))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_error)?;

        let (input_tokens, output_tokens) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(Completion {
            text: response.content,
            model: request.model.clone(),
            input_tokens: input_tokens as u64,
            output_tokens: output_tokens as u64,
            latency: response.latency,
        })
    }

    async fn embed(&self, text: &str, model: &str) -> LlmResult<Embedding> {
        let response = tokio::time::timeout(
            self.call_timeout,
            self.client.create_embedding(text, model),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(map_error)?;

        Ok(Embedding {
            dim: response.embedding.len(),
            vector: response.embedding,
            model: model.to_string(),
            input_tokens: response.prompt_tokens as u64,
            latency: response.latency,
        })
    }
}
