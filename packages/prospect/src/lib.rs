//! # Prospect
//!
//! A company intelligence extraction engine: given a company name and
//! (optionally) a website, it crawls the company's public web presence,
//! selects the most informative pages with an LLM, extracts their content,
//! fuses it into a structured sales profile, and persists both a dense
//! embedding and a compact filterable metadata record. A similarity engine
//! proposes and validates relationships between researched companies.
//!
//! ## Architecture
//!
//! ```text
//! DISCOVER → SELECT → FETCH → AGGREGATE → COMMIT
//!
//! 1. LinkDiscoverer enumerates candidates (robots, sitemaps, BFS crawl)
//! 2. PageSelector ranks them with an LLM (heuristic fallback)
//! 3. ParallelFetcher extracts page text under a concurrency cap
//! 4. ContentAggregator fuses text into a CompanyProfile + embedding text
//! 5. ResearchOrchestrator embeds, upserts the vector, writes the document
//!
//! SimilarityDiscoverer: vector neighbors ∪ LLM candidates → 3-method
//! validation (structured / embedding / LLM judge, 2-of-3 voting) →
//! bidirectional edges in vector metadata.
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prospect::{
//!     DiscoverTarget, EngineConfig, HttpPageFetcher, InMemoryDocumentStore,
//!     InMemoryVectorStore, ResearchOrchestrator, ResearchRequest,
//!     SimilarityDiscoverer,
//! };
//!
//! let config = EngineConfig::default();
//! let llm = Arc::new(prospect::llm::openai::OpenAiProvider::from_env()?);
//! let fetcher = Arc::new(HttpPageFetcher::new(&config));
//! let vector = Arc::new(InMemoryVectorStore::with_default_schema(config.embedding_dim));
//! let docs = Arc::new(InMemoryDocumentStore::new());
//!
//! let engine = ResearchOrchestrator::new(config, llm, fetcher, vector, docs);
//!
//! let job_id = engine
//!     .start(ResearchRequest::new("Visterra Inc").with_website("https://visterrainc.com"))
//!     .await?;
//! let job = engine.await_job(job_id).await?;
//! let company = engine.get_company(job.company_id.unwrap()).await?.unwrap();
//!
//! let discoverer = SimilarityDiscoverer::new(engine.clone());
//! let similar = discoverer
//!     .discover(DiscoverTarget::Known(company.id), &Default::default())
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`research`] - the job state machine and four-phase pipeline driver
//! - [`discovery`] - candidate URL enumeration (robots, sitemaps, crawl)
//! - [`selection`] - LLM page ranking with heuristic fallback
//! - [`fetch`] - bounded-parallel HTTP fetching and text extraction
//! - [`aggregate`] - LLM profile fusion and embedding-text construction
//! - [`similarity`] - candidate generation, composite validation, edges
//! - [`vector`] - vector store gateway and in-memory implementation
//! - [`docstore`] - full-profile document store
//! - [`search`] - pluggable search providers with merged ranking
//! - [`llm`] - LLM provider seam, defensive JSON parsing, backoff
//! - [`events`] - per-job progress/terminal event bus
//! - [`security`] - SSRF validation and credential handling
//! - [`testing`] - deterministic mocks for all external seams

pub mod aggregate;
pub mod config;
pub mod discovery;
pub mod docstore;
pub mod error;
pub mod events;
pub mod fetch;
pub mod llm;
pub mod research;
pub mod search;
pub mod security;
pub mod selection;
pub mod similarity;
pub mod testing;
pub mod types;
pub mod vector;

// Re-export the core surface at the crate root
pub use config::{EngineConfig, ModelRates, SimilarityConfig, StructuredWeights};
pub use docstore::{DocumentStore, InMemoryDocumentStore};
pub use error::{
    AggregationError, DiscoveryError, EngineError, FetchFailure, LlmError, PersistenceError,
    Result, SearchError, SecurityError, SelectionError,
};
pub use events::{JobEvent, ProgressBus, ProgressEvent, TerminalEvent};
pub use fetch::{FetchOutcome, FetchedBody, HttpPageFetcher, PageFetcher, ParallelFetcher};
pub use llm::{
    complete_with_backoff, Completion, CompletionOutcome, CompletionRequest, Embedding,
    LlmProvider,
};
pub use research::{CancelOutcome, ResearchOrchestrator, ResearchRequest};
pub use search::{
    ProviderInfo, SearchHit, SearchParams, SearchProvider, SearchRegistry, SerpProvider,
    TavilyProvider,
};
pub use security::{ApiKey, ProviderCredentials, UrlValidator};
pub use selection::{PageSelector, Selection};
pub use similarity::{DiscoverTarget, SimilarityDiscoverer};
pub use types::{
    canonical_key, normalize_url, site_root, BusinessModel, CandidateOrigin, Company, CompanyId,
    CompanyProfile, CompanyStage, DiscoverySource, GeographicScope, JobError, JobId, JobMetrics,
    JobState, Leader, MethodScores, PageCandidate, PageContent, Phase, PhaseUsage, Provenance,
    ResearchJob, SimilarCompany, SimilarityEdge, TechSophistication,
};
pub use vector::{
    cosine_similarity, EdgeRef, Filter, InMemoryVectorStore, MetadataSchema, MetadataValue,
    QueryMatch, VectorRecord, VectorStore,
};

pub use aggregate::{build_embedding_text, AggregateOutput, ContentAggregator};
pub use discovery::LinkDiscoverer;
