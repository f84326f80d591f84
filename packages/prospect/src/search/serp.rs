//! Serper.dev (Google SERP) search provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};
use crate::security::ApiKey;

use super::{ProviderInfo, SearchHit, SearchParams, SearchProvider};

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Serper-backed Google results provider.
///
/// Serper does not score results; position in the organic ranking is
/// converted into a confidence so the registry's noisy-or merge has
/// something to work with.
pub struct SerpProvider {
    api_key: ApiKey,
    client: reqwest::Client,
    requests_per_minute: u32,
}

impl SerpProvider {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            requests_per_minute: 100,
        }
    }

    /// Create from `SERPER_API_KEY`, when set.
    pub fn from_env() -> Option<Self> {
        ApiKey::from_env("SERPER_API_KEY").map(Self::new)
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

#[derive(Serialize)]
struct Request {
    q: String,
    num: usize,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    title: Option<String>,
    link: String,
    snippet: Option<String>,
    position: Option<usize>,
}

/// First position ≈0.9, decaying toward 0.3 down the page.
fn position_score(position: usize) -> f32 {
    (0.9 - 0.06 * (position.saturating_sub(1)) as f32).max(0.3)
}

#[async_trait]
impl SearchProvider for SerpProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "serper".to_string(),
            version: "v1".to_string(),
            requests_per_minute: self.requests_per_minute,
            supports_date_filter: false,
            supports_domain_filter: true,
        }
    }

    async fn search(&self, query: &str, params: &SearchParams) -> SearchResult<Vec<SearchHit>> {
        // Domain restriction goes through the query syntax.
        let q = match &params.domain {
            Some(domain) => format!("site:{domain} {query}"),
            None => query.to_string(),
        };
        let request = Request {
            q,
            num: params.limit.max(1),
        };

        let response = self
            .client
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", self.api_key.expose())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Provider {
                provider: "serper".to_string(),
                reason: e.to_string(),
            })?;

        if response.status().as_u16() == 429 {
            return Err(SearchError::RateLimited {
                provider: "serper".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SearchError::Provider {
                provider: "serper".to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let parsed: Response = response.json().await.map_err(|e| SearchError::Provider {
            provider: "serper".to_string(),
            reason: e.to_string(),
        })?;

        let hits = parsed
            .organic
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| {
                url::Url::parse(&r.link).ok()?;
                Some(SearchHit {
                    title: r.title.unwrap_or_default(),
                    url: r.link,
                    snippet: r.snippet.unwrap_or_default(),
                    score: position_score(r.position.unwrap_or(i + 1)),
                    published_at: None,
                    providers: vec!["serper".to_string()],
                })
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_scores_decay_and_floor() {
        assert!((position_score(1) - 0.9).abs() < 1e-6);
        assert!(position_score(2) < position_score(1));
        assert_eq!(position_score(50), 0.3);
    }
}
