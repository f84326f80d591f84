//! Typed errors for the research engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers get
//! strongly-typed, composable error handling. Every error maps to a stable
//! machine-readable kind via [`EngineError::kind`]; the `Display` message is
//! phrased for end users.

use std::time::Duration;

use thiserror::Error;

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The supplied website URL could not be parsed or normalized.
    #[error("the website URL is not valid: {url}")]
    InvalidUrl { url: String },

    /// The supplied company name is unusable (empty or whitespace).
    #[error("the company name is not valid: {reason}")]
    InvalidCompanyName { reason: String },

    /// Link discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Page selection failed.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Every fetch in the job failed; the kind of the first recorded
    /// failure is carried for programmatic handling.
    #[error("no pages could be fetched: {first_failure}")]
    NoPagesFetched { first_failure: FetchFailure },

    /// Aggregation failed.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// LLM provider failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Vector store or document store failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// External search failed.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// A URL failed SSRF validation.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// The job was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The job-level deadline expired.
    #[error("the operation did not finish before its deadline")]
    DeadlineExceeded,

    /// Unknown job id.
    #[error("no job with id {job_id}")]
    JobNotFound { job_id: String },
}

impl EngineError {
    /// Stable machine-readable kind for programmatic handling.
    ///
    /// Messages may be reworded between releases; kinds never change.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "InvalidUrl",
            Self::InvalidCompanyName { .. } => "InvalidCompanyName",
            Self::Discovery(e) => e.kind(),
            Self::Selection(e) => e.kind(),
            Self::NoPagesFetched { first_failure } => first_failure.kind(),
            Self::Aggregation(e) => e.kind(),
            Self::Llm(e) => e.kind(),
            Self::Persistence(e) => e.kind(),
            Self::Search(e) => e.kind(),
            Self::Security(_) => "InvalidUrl",
            Self::Cancelled => "Cancelled",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::JobNotFound { .. } => "JobNotFound",
        }
    }
}

/// Errors from the link discovery phase.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The homepage could not be fetched; there is no usable seed.
    #[error("could not reach the company website at {url}: {reason}")]
    HomepageUnreachable { url: String, reason: String },

    /// Discovery finished with an empty candidate set.
    #[error("no crawlable pages were found on the company website")]
    NoCandidatesFound,
}

impl DiscoveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HomepageUnreachable { .. } => "HomepageUnreachable",
            Self::NoCandidatesFound => "NoCandidatesFound",
        }
    }
}

/// Errors from the page selection phase.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The model response could not be parsed after all retries and the
    /// heuristic fallback had nothing to rank.
    #[error("the page ranking response could not be understood after {attempts} attempts")]
    ResponseUnparseable { attempts: u32 },

    /// Selection produced zero usable URLs.
    #[error("no pages were selected for extraction")]
    EmptySelection,
}

impl SelectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResponseUnparseable { .. } => "SelectorResponseUnparseable",
            Self::EmptySelection => "SelectorEmptySelection",
        }
    }
}

/// Per-URL fetch failures.
///
/// These are values, not propagated errors: the fetcher records them per
/// URL and only the all-failed case is fatal for a job.
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    /// The per-fetch deadline expired.
    #[error("the page did not respond in time")]
    Timeout,

    /// Connection-level failure (DNS, reset, TLS).
    #[error("the page could not be reached: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("the page returned HTTP {status}")]
    HttpStatus { status: u16 },

    /// The response body exceeded the per-page byte cap.
    #[error("the page was larger than the configured size cap")]
    BodyCapExceeded,

    /// The site refused the request (403 or 429), likely bot protection.
    #[error("the site blocked the request with HTTP {status}")]
    Blocked { status: u16 },

    /// The URL failed SSRF validation before any request was made.
    #[error("the URL was rejected for safety: {0}")]
    Security(String),
}

impl FetchFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "FetchTimeout",
            Self::Network(_) => "FetchNetworkError",
            Self::HttpStatus { .. } => "FetchHttpStatus",
            Self::BodyCapExceeded => "FetchBodyCapExceeded",
            Self::Blocked { .. } => "RobotsBlocked",
            Self::Security(_) => "InvalidUrl",
        }
    }

    /// Transient failures are worth one retry; 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::HttpStatus { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors from the aggregation phase.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The model response stayed unparseable after the repair retry and no
    /// embedding text could be salvaged.
    #[error("the extracted content could not be structured")]
    Unparseable,
}

impl AggregationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unparseable => "LlmUnparseable",
        }
    }
}

/// Errors from LLM and embedding providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider returned a rate-limit response (HTTP 429).
    #[error("the model provider is rate limiting requests")]
    RateLimited { retry_after: Option<Duration> },

    /// Provider-side failure (5xx, malformed response, auth).
    #[error("the model provider failed: {0}")]
    Provider(String),

    /// The per-call deadline expired.
    #[error("the model call did not finish in time")]
    Timeout,
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "LlmRateLimited",
            Self::Provider(_) => "LlmProviderError",
            Self::Timeout => "LlmProviderError",
        }
    }
}

/// Errors from the vector store and document store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The vector length does not match the index dimension. This is a
    /// configuration error and always fatal.
    #[error("embedding dimension {actual} does not match the index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Metadata violates the declared schema (unknown field or too many).
    #[error("metadata rejected: {reason}")]
    MetadataRejected { reason: String },

    /// Vector upsert failed after its retry.
    #[error("the company embedding could not be saved: {0}")]
    UpsertFailed(String),

    /// Document store write failed; a compensating vector delete was
    /// attempted by the caller.
    #[error("the company profile could not be saved: {0}")]
    DocumentStoreFailed(String),

    /// Backend-level failure for reads and deletes.
    #[error("storage error: {0}")]
    Backend(String),
}

impl PersistenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "VectorDimensionMismatch",
            Self::MetadataRejected { .. } => "VectorUpsertFailed",
            Self::UpsertFailed(_) => "VectorUpsertFailed",
            Self::DocumentStoreFailed(_) => "DocumentStoreFailed",
            Self::Backend(_) => "DocumentStoreFailed",
        }
    }
}

/// Errors from the search-tool registry.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Every enabled provider failed or was rate limited.
    #[error("no search provider returned results")]
    NoSearchResults,

    /// A single provider failed (non-fatal inside the registry).
    #[error("search provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    /// The provider's request-per-minute cap was hit.
    #[error("search provider {provider} is over its rate limit")]
    RateLimited { provider: String },
}

impl SearchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSearchResults => "NoSearchResults",
            Self::Provider { .. } => "SearchProviderError",
            Self::RateLimited { .. } => "SearchProviderError",
        }
    }
}

/// Security-related errors, primarily for SSRF protection.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked (e.g., localhost, internal IPs)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP in blocked CIDR range (e.g., 10.0.0.0/8)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for LLM operations.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Result type alias for persistence operations.
pub type PersistResult<T> = std::result::Result<T, PersistenceError>;

/// Result type alias for search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Result type alias for security checks.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            EngineError::from(DiscoveryError::NoCandidatesFound).kind(),
            "NoCandidatesFound"
        );
        assert_eq!(
            EngineError::from(PersistenceError::DimensionMismatch {
                expected: 1024,
                actual: 1536
            })
            .kind(),
            "VectorDimensionMismatch"
        );
        assert_eq!(EngineError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            EngineError::NoPagesFetched {
                first_failure: FetchFailure::Timeout
            }
            .kind(),
            "FetchTimeout"
        );
    }

    #[test]
    fn transient_fetch_failures() {
        assert!(FetchFailure::Timeout.is_transient());
        assert!(FetchFailure::Network("reset".into()).is_transient());
        assert!(FetchFailure::HttpStatus { status: 503 }.is_transient());
        assert!(!FetchFailure::HttpStatus { status: 404 }.is_transient());
        assert!(!FetchFailure::Blocked { status: 429 }.is_transient());
    }
}
