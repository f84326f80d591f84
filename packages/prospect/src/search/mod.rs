//! Pluggable external search providers.
//!
//! Each provider declares its name, rate limit, and capability flags; the
//! registry fans a query out to every enabled provider, merges rankings,
//! and caches results.

pub mod registry;
pub mod serp;
pub mod tavily;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SearchResult;

pub use registry::SearchRegistry;
pub use serp::SerpProvider;
pub use tavily::TavilyProvider;

/// Search parameters beyond the query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum results wanted from each provider.
    pub limit: usize,

    /// Restrict results to one registrable domain, for providers that
    /// support it.
    pub domain: Option<String>,

    /// Only results published after this instant, for providers that
    /// support date filtering.
    pub published_after: Option<DateTime<Utc>>,
}

impl SearchParams {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Stable hash over the parameters, for cache keying.
    pub fn cache_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.limit.to_le_bytes());
        hasher.update(self.domain.as_deref().unwrap_or("").as_bytes());
        if let Some(after) = self.published_after {
            hasher.update(after.timestamp().to_le_bytes());
        }
        let digest = hasher.finalize();
        format!("{digest:x}")[..16].to_string()
    }
}

/// One search result from one provider (or merged across providers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,

    /// Normalized URL.
    pub url: String,

    pub snippet: String,

    /// Confidence in [0, 1]. For merged hits this is the noisy-or of the
    /// contributing providers' scores.
    pub score: f32,

    pub published_at: Option<DateTime<Utc>>,

    /// Providers that returned this URL.
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Static description of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: String,

    /// Sliding-window requests-per-minute cap.
    pub requests_per_minute: u32,

    pub supports_date_filter: bool,
    pub supports_domain_filter: bool,
}

/// The provider contract.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Declared name, rate limit, and capabilities.
    fn info(&self) -> ProviderInfo;

    /// Run one search. Scores must land in [0, 1].
    async fn search(&self, query: &str, params: &SearchParams) -> SearchResult<Vec<SearchHit>>;
}

/// Normalize a query for cache identity: lowercase, collapsed whitespace.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalization() {
        assert_eq!(normalize_query("  Visterra   Inc "), "visterra inc");
        assert_eq!(normalize_query("ACME"), "acme");
    }

    #[test]
    fn param_hash_distinguishes_params() {
        let a = SearchParams::new(10);
        let b = SearchParams::new(10).with_domain("example.com");
        let c = SearchParams::new(20);
        assert_ne!(a.cache_hash(), b.cache_hash());
        assert_ne!(a.cache_hash(), c.cache_hash());
        assert_eq!(a.cache_hash(), SearchParams::new(10).cache_hash());
    }
}
