//! Search registry: fan-out, merge, rate limiting, caching.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use tracing::{debug, info, warn};

use crate::error::{SearchError, SearchResult};
use crate::types::normalize_url;

use super::{normalize_query, SearchHit, SearchParams, SearchProvider};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

struct CacheEntry {
    stored_at: Instant,
    hits: Vec<SearchHit>,
}

/// Named providers with aggregation and fallback.
pub struct SearchRegistry {
    providers: Vec<Arc<dyn SearchProvider>>,
    limiters: HashMap<String, DirectRateLimiter>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl SearchRegistry {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            providers: Vec::new(),
            limiters: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Register a provider. Its declared requests-per-minute cap becomes a
    /// sliding-window quota.
    pub fn register(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        let info = provider.info();
        let rpm = NonZeroU32::new(info.requests_per_minute).unwrap_or(nonzero!(60u32));
        self.limiters.insert(
            info.name.clone(),
            RateLimiter::direct(Quota::per_minute(rpm)),
        );
        self.providers.push(provider);
        self
    }

    /// Names of the enabled providers.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.info().name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fan out to all enabled providers, merge, dedupe, rank.
    ///
    /// Per-provider failures are non-fatal; the call fails with
    /// `NoSearchResults` only when no provider succeeds.
    pub async fn search_all(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> SearchResult<Vec<SearchHit>> {
        if self.providers.is_empty() {
            return Err(SearchError::NoSearchResults);
        }

        let normalized_query = normalize_query(query);
        let param_hash = params.cache_hash();

        let mut per_provider: Vec<(String, Vec<SearchHit>)> = Vec::new();
        let mut to_call: Vec<Arc<dyn SearchProvider>> = Vec::new();

        // Cache pass: serve what we can, figure out who to call.
        for provider in &self.providers {
            let name = provider.info().name;
            let key = cache_key(&name, &normalized_query, &param_hash);
            if let Some(hits) = self.cache_lookup(&key) {
                debug!(provider = %name, query = %normalized_query, "search cache hit");
                per_provider.push((name, hits));
            } else {
                to_call.push(Arc::clone(provider));
            }
        }

        // Rate-limit pass: a provider over its cap counts as failed.
        let mut failures = 0usize;
        let mut callable: Vec<Arc<dyn SearchProvider>> = Vec::new();
        for provider in to_call {
            let name = provider.info().name;
            match self.limiters.get(&name) {
                Some(limiter) if limiter.check().is_err() => {
                    warn!(provider = %name, "search provider over rate limit, skipping");
                    failures += 1;
                }
                _ => callable.push(provider),
            }
        }

        // Fan out the remaining providers in parallel.
        let results = join_all(callable.iter().map(|provider| {
            let name = provider.info().name;
            async move { (name, provider.search(query, params).await) }
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(hits) => {
                    let key = cache_key(&name, &normalized_query, &param_hash);
                    self.cache_store(key, hits.clone());
                    per_provider.push((name, hits));
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "search provider failed");
                    failures += 1;
                }
            }
        }

        if per_provider.is_empty() {
            info!(query = %normalized_query, failures, "all search providers failed");
            return Err(SearchError::NoSearchResults);
        }

        Ok(merge_rankings(per_provider))
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<SearchHit>> {
        let cache = self.cache.read().unwrap();
        cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.hits.clone())
    }

    fn cache_store(&self, key: String, hits: Vec<SearchHit>) {
        let mut cache = self.cache.write().unwrap();
        // Opportunistic expiry sweep keeps the map from growing unbounded.
        cache.retain(|_, entry| entry.stored_at.elapsed() < self.cache_ttl);
        cache.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                hits,
            },
        );
    }
}

fn cache_key(provider: &str, normalized_query: &str, param_hash: &str) -> String {
    format!("{provider}|{normalized_query}|{param_hash}")
}

/// Merge per-provider rankings with noisy-or scoring.
///
/// A URL returned by several providers scores `1 − Π(1 − sᵢ)`, promoting
/// corroborated results above any single provider's confidence.
fn merge_rankings(per_provider: Vec<(String, Vec<SearchHit>)>) -> Vec<SearchHit> {
    struct Merged {
        hit: SearchHit,
        complement: f64,
    }

    let mut by_url: HashMap<String, Merged> = HashMap::new();

    for (provider, hits) in per_provider {
        for hit in hits {
            let url = normalize_url(&hit.url).unwrap_or_else(|_| hit.url.clone());
            let score = hit.score.clamp(0.0, 1.0) as f64;

            let entry = by_url.entry(url.clone()).or_insert_with(|| Merged {
                hit: SearchHit {
                    url,
                    providers: Vec::new(),
                    score: 0.0,
                    ..hit.clone()
                },
                complement: 1.0,
            });
            entry.complement *= 1.0 - score;
            if !entry.hit.providers.contains(&provider) {
                entry.hit.providers.push(provider.clone());
            }
            // Prefer the richer snippet/title among contributors.
            if hit.snippet.len() > entry.hit.snippet.len() {
                entry.hit.snippet = hit.snippet;
            }
            if hit.title.len() > entry.hit.title.len() {
                entry.hit.title = hit.title;
            }
        }
    }

    let mut merged: Vec<SearchHit> = by_url
        .into_values()
        .map(|m| {
            let mut hit = m.hit;
            hit.score = (1.0 - m.complement) as f32;
            hit
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });
    merged
}
