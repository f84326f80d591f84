//! Tavily search provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};
use crate::security::ApiKey;

use super::{ProviderInfo, SearchHit, SearchParams, SearchProvider};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Tavily-backed provider.
pub struct TavilyProvider {
    api_key: ApiKey,
    client: reqwest::Client,
    requests_per_minute: u32,
}

impl TavilyProvider {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            requests_per_minute: 60,
        }
    }

    /// Create from `TAVILY_API_KEY`, when set.
    pub fn from_env() -> Option<Self> {
        ApiKey::from_env("TAVILY_API_KEY").map(Self::new)
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

#[derive(Serialize)]
struct Request {
    query: String,
    search_depth: String,
    max_results: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<String>,
}

#[derive(Deserialize)]
struct Response {
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
    score: Option<f32>,
    published_date: Option<DateTime<Utc>>,
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "tavily".to_string(),
            version: "v1".to_string(),
            requests_per_minute: self.requests_per_minute,
            supports_date_filter: false,
            supports_domain_filter: true,
        }
    }

    async fn search(&self, query: &str, params: &SearchParams) -> SearchResult<Vec<SearchHit>> {
        let request = Request {
            query: query.to_string(),
            search_depth: "basic".to_string(),
            max_results: params.limit.max(1),
            include_domains: params.domain.iter().cloned().collect(),
        };

        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Provider {
                provider: "tavily".to_string(),
                reason: e.to_string(),
            })?;

        if response.status().as_u16() == 429 {
            return Err(SearchError::RateLimited {
                provider: "tavily".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SearchError::Provider {
                provider: "tavily".to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let parsed: Response = response.json().await.map_err(|e| SearchError::Provider {
            provider: "tavily".to_string(),
            reason: e.to_string(),
        })?;

        let hits = parsed
            .results
            .into_iter()
            .filter_map(|r| {
                url::Url::parse(&r.url).ok()?;
                Some(SearchHit {
                    title: r.title.unwrap_or_default(),
                    url: r.url,
                    snippet: r.content.unwrap_or_default(),
                    score: r.score.unwrap_or(0.5).clamp(0.0, 1.0),
                    published_at: r.published_date,
                    providers: vec!["tavily".to_string()],
                })
            })
            .collect();

        Ok(hits)
    }
}
