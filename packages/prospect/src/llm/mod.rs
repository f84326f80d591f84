//! LLM provider abstraction.
//!
//! The engine talks to chat and embedding models through [`LlmProvider`];
//! implementations wrap specific providers and handle transport. Every call
//! returns token usage and wall time so the orchestrator can account cost.

pub mod json;

#[cfg(feature = "openai")]
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ModelRates;
use crate::error::{EngineError, LlmError, LlmResult};
use crate::types::PhaseUsage;

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A chat completion with its accounting data.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency: Duration,
}

impl Completion {
    /// Fold this call into a phase usage record.
    pub fn meter(&self, usage: &mut PhaseUsage, rates: ModelRates) {
        usage.record_call(
            self.input_tokens,
            self.output_tokens,
            rates.cost(self.input_tokens, self.output_tokens),
        );
        usage.record_wall(self.latency);
    }
}

/// An embedding with its accounting data.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dim: usize,
    pub model: String,
    pub input_tokens: u64,
    pub latency: Duration,
}

impl Embedding {
    pub fn meter(&self, usage: &mut PhaseUsage, rates: ModelRates) {
        usage.record_call(self.input_tokens, 0, rates.cost(self.input_tokens, 0));
        usage.record_wall(self.latency);
    }
}

/// Chat + embedding provider.
///
/// At least one chat model and one embedding model must be configured.
/// Providers map transport failures to [`LlmError`]; response *parsing* is
/// the caller's concern.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a chat completion.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion>;

    /// Embed a single text.
    async fn embed(&self, text: &str, model: &str) -> LlmResult<Embedding>;
}

/// A completion together with how many provider calls it took.
///
/// Rate-limited attempts count toward a job's call metrics even though
/// they produced no tokens.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub completion: Completion,

    /// Total provider calls made, including rate-limited ones.
    pub attempts: u32,
}

impl CompletionOutcome {
    /// Fold every attempt of this call into a phase usage record.
    pub fn meter(&self, usage: &mut PhaseUsage, rates: ModelRates) {
        self.completion.meter(usage, rates);
        // Rate-limited attempts consumed a call each, zero tokens.
        usage.llm_calls += self.attempts.saturating_sub(1);
    }
}

/// Run a completion with exponential backoff on rate limits.
///
/// Rate-limit responses are retried up to `max_retries` times; other
/// provider errors propagate immediately. Cancellation is checked before
/// each attempt and during backoff sleeps.
pub async fn complete_with_backoff(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
    max_retries: u32,
    backoff_base: Duration,
    cancel: &CancellationToken,
) -> Result<CompletionOutcome, EngineError> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match provider.complete(request).await {
            Ok(completion) => {
                return Ok(CompletionOutcome {
                    completion,
                    attempts: attempt + 1,
                })
            }
            Err(LlmError::RateLimited { retry_after }) if attempt < max_retries => {
                let backoff = retry_after
                    .unwrap_or_else(|| backoff_base * 2u32.saturating_pow(attempt));
                tracing::warn!(
                    model = %request.model,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "model provider rate limited, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;

    #[tokio::test]
    async fn backoff_recovers_from_rate_limits() {
        let llm = MockLlm::new(8)
            .rate_limited_times(2)
            .with_completion("all clear");
        let request = CompletionRequest::new("test-model", "hello");
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let outcome = complete_with_backoff(
            &llm,
            &request,
            3,
            Duration::from_millis(20),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.completion.text, "all clear");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(llm.completion_calls(), 3);
        // 20ms + 40ms of backoff must have elapsed
        assert!(started.elapsed() >= Duration::from_millis(60));

        // All three attempts land in the metrics
        let mut usage = PhaseUsage::default();
        outcome.meter(&mut usage, ModelRates::default());
        assert_eq!(usage.llm_calls, 3);
    }

    #[tokio::test]
    async fn backoff_gives_up_after_max_retries() {
        let llm = MockLlm::new(8).rate_limited_times(10);
        let request = CompletionRequest::new("test-model", "hello");
        let cancel = CancellationToken::new();

        let err = complete_with_backoff(&llm, &request, 2, Duration::from_millis(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LlmRateLimited");
        assert_eq!(llm.completion_calls(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let llm = MockLlm::new(8).rate_limited_times(10);
        let request = CompletionRequest::new("test-model", "hello");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = complete_with_backoff(&llm, &request, 3, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
    }
}
