//! Engine configuration.
//!
//! Plain data passed in by the embedding application; the engine never
//! reads files or environment variables itself.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cost rates for one model, in USD per million tokens.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelRates {
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Estimated cost of one call.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Field-overlap weights for structured similarity scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StructuredWeights {
    pub industry: f32,
    pub business_model: f32,
    pub target_market: f32,
    pub key_services: f32,
    pub tech_stack: f32,
}

impl Default for StructuredWeights {
    fn default() -> Self {
        Self {
            industry: 0.35,
            business_model: 0.15,
            target_market: 0.15,
            key_services: 0.20,
            tech_stack: 0.15,
        }
    }
}

/// Similarity discovery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Per-method score threshold for the 2-of-3 vote.
    pub threshold: f32,

    /// Nearest neighbors pulled from the vector index in known mode.
    pub vector_top_k: usize,

    /// Candidates requested from the LLM.
    pub llm_candidates: usize,

    /// Research jobs a single discovery request may trigger for candidates
    /// missing from the store.
    pub research_budget: usize,

    /// Edges kept per company in vector metadata.
    pub max_edges: usize,

    pub weights: StructuredWeights,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            vector_top_k: 20,
            llm_candidates: 10,
            research_budget: 3,
            max_edges: 50,
            weights: StructuredWeights::default(),
        }
    }
}

/// Configuration for the whole engine.
///
/// Durations are stored as integer seconds/milliseconds so outer layers can
/// deserialize the struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Concurrency caps
    pub max_concurrent_jobs: usize,
    pub fetcher_parallelism: usize,
    pub aggregator_shards: usize,

    // Deadlines
    pub fetch_timeout_s: u64,
    pub llm_timeout_s: u64,
    pub embed_timeout_s: u64,
    pub vector_timeout_s: u64,
    pub job_deadline_s: u64,
    pub discovery_deadline_s: u64,

    // Limits
    pub max_candidates: usize,
    pub max_crawl_depth: usize,
    pub crawl_branching: usize,
    pub selector_max_pages: usize,
    pub selector_prompt_candidates: usize,
    pub per_page_chars: usize,
    pub aggregate_chars: usize,
    pub per_page_bytes: usize,
    pub prompt_char_budget: usize,
    pub embed_char_cap: usize,

    // TTLs
    pub research_staleness_days: i64,
    pub search_cache_ttl_s: u64,

    // Models
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    #[serde(default)]
    pub model_rates: HashMap<String, ModelRates>,

    // Retries
    pub llm_max_retries: u32,
    pub llm_backoff_ms: u64,

    pub similarity: SimilarityConfig,

    /// User-Agent for all outbound HTTP.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            fetcher_parallelism: 10,
            aggregator_shards: 4,
            fetch_timeout_s: 15,
            llm_timeout_s: 60,
            embed_timeout_s: 30,
            vector_timeout_s: 10,
            job_deadline_s: 480,
            discovery_deadline_s: 60,
            max_candidates: 500,
            max_crawl_depth: 3,
            crawl_branching: 20,
            selector_max_pages: 10,
            selector_prompt_candidates: 200,
            per_page_chars: 10_000,
            aggregate_chars: 500_000,
            per_page_bytes: 2 * 1024 * 1024,
            prompt_char_budget: 100_000,
            embed_char_cap: 8_000,
            research_staleness_days: 30,
            search_cache_ttl_s: 1800,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            model_rates: HashMap::new(),
            llm_max_retries: 3,
            llm_backoff_ms: 1000,
            similarity: SimilarityConfig::default(),
            user_agent: concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
            )
            .to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chat model.
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    /// Set the embedding model and its dimension.
    pub fn with_embedding_model(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.embedding_model = model.into();
        self.embedding_dim = dim;
        self
    }

    /// Register cost rates for a model.
    pub fn with_model_rates(mut self, model: impl Into<String>, rates: ModelRates) -> Self {
        self.model_rates.insert(model.into(), rates);
        self
    }

    /// Set how many pages the selector picks, clamped to the supported
    /// 5..=50 range.
    pub fn with_selector_max_pages(mut self, pages: usize) -> Self {
        self.selector_max_pages = pages.clamp(5, 50);
        self
    }

    /// Set fetcher parallelism.
    pub fn with_fetcher_parallelism(mut self, parallelism: usize) -> Self {
        self.fetcher_parallelism = parallelism.max(1);
        self
    }

    /// Set the global concurrent-job cap.
    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs.max(1);
        self
    }

    /// Set the similarity vote threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_s)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_s)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_s)
    }

    pub fn vector_timeout(&self) -> Duration {
        Duration::from_secs(self.vector_timeout_s)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_s)
    }

    pub fn discovery_deadline(&self) -> Duration {
        Duration::from_secs(self.discovery_deadline_s)
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_s)
    }

    pub fn research_staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.research_staleness_days)
    }

    /// Rates for a model; zero rates (free accounting) when unconfigured.
    pub fn rates_for(&self, model: &str) -> ModelRates {
        self.model_rates.get(model).copied().unwrap_or_default()
    }
}
