//! Testing utilities including mock implementations.
//!
//! Deterministic, scriptable stand-ins for the LLM provider, the HTTP
//! fetcher, the search providers, and the stores, so applications (and this
//! crate's own tests) can exercise the pipeline without network or model
//! calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::docstore::{DocumentStore, InMemoryDocumentStore};
use crate::error::{
    FetchFailure, LlmError, LlmResult, PersistResult, PersistenceError, SearchError, SearchResult,
};
use crate::fetch::{FetchedBody, PageFetcher};
use crate::llm::{Completion, CompletionRequest, Embedding, LlmProvider};
use crate::search::{normalize_query, ProviderInfo, SearchHit, SearchParams, SearchProvider};
use crate::types::{Company, CompanyId, PageContent};

/// Build a [`PageContent`] fixture.
pub fn page(url: &str, text: &str) -> PageContent {
    PageContent {
        url: url.to_string(),
        fetched_at: Utc::now(),
        status: 200,
        content_type: Some("text/html".to_string()),
        title: None,
        text: text.to_string(),
        bytes_read: text.len(),
        fetch_duration: Duration::from_millis(10),
    }
}

// ============================================================================
// MockLlm
// ============================================================================

#[derive(Default)]
struct MockLlmState {
    completions: VecDeque<String>,
    rate_limited_remaining: usize,
    completion_calls: usize,
    embed_calls: usize,
    prompts: Vec<String>,
}

/// Scripted LLM provider.
///
/// Completions are served FIFO from the scripted queue; an empty queue
/// yields `{}`. Embeddings are deterministic functions of the input text,
/// so identical text always produces the identical vector.
#[derive(Clone)]
pub struct MockLlm {
    state: Arc<Mutex<MockLlmState>>,
    embedding_dim: usize,
}

impl MockLlm {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockLlmState::default())),
            embedding_dim,
        }
    }

    /// Queue a completion response.
    pub fn with_completion(self, text: impl Into<String>) -> Self {
        self.state.lock().unwrap().completions.push_back(text.into());
        self
    }

    /// Make the next `n` completion calls fail with a rate limit.
    pub fn rate_limited_times(self, n: usize) -> Self {
        self.state.lock().unwrap().rate_limited_remaining = n;
        self
    }

    /// A second handle sharing the same scripted state.
    pub fn clone_handle(&self) -> Self {
        self.clone()
    }

    /// Number of completion calls made (including rate-limited ones).
    pub fn completion_calls(&self) -> usize {
        self.state.lock().unwrap().completion_calls
    }

    /// Number of embedding calls made.
    pub fn embed_calls(&self) -> usize {
        self.state.lock().unwrap().embed_calls
    }

    /// The most recent user prompt.
    pub fn last_prompt(&self) -> Option<String> {
        self.state.lock().unwrap().prompts.last().cloned()
    }

    /// All user prompts, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().prompts.clone()
    }

    /// Deterministic sha-seeded embedding for a text.
    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();
        (0..self.embedding_dim)
            .map(|i| {
                let byte = hash[i % 32] as f32;
                (byte / 127.5) - 1.0 + (i as f32 * 1e-4)
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
        let mut state = self.state.lock().unwrap();
        state.completion_calls += 1;
        state.prompts.push(request.prompt.clone());

        if state.rate_limited_remaining > 0 {
            state.rate_limited_remaining -= 1;
            return Err(LlmError::RateLimited { retry_after: None });
        }

        let text = state.completions.pop_front().unwrap_or_else(|| "{}".to_string());
        Ok(Completion {
            text,
            model: request.model.clone(),
            input_tokens: (request.prompt.len() / 4) as u64,
            output_tokens: 64,
            latency: Duration::from_millis(5),
        })
    }

    async fn embed(&self, text: &str, model: &str) -> LlmResult<Embedding> {
        self.state.lock().unwrap().embed_calls += 1;
        Ok(Embedding {
            vector: self.embedding_for(text),
            dim: self.embedding_dim,
            model: model.to_string(),
            input_tokens: (text.len() / 4) as u64,
            latency: Duration::from_millis(3),
        })
    }
}

// ============================================================================
// MockFetcher
// ============================================================================

#[derive(Clone)]
struct MockPage {
    status: u16,
    body: String,
    content_type: String,
    delay: Duration,
    fail_first: bool,
}

#[derive(Default)]
struct MockFetcherState {
    calls: HashMap<String, usize>,
    current: usize,
    max_concurrent: usize,
}

/// Scripted HTTP fetcher.
///
/// Unknown URLs return HTTP 404. Tracks per-URL call counts and the
/// high-water mark of concurrent in-flight fetches.
pub struct MockFetcher {
    pages: HashMap<String, MockPage>,
    state: Arc<Mutex<MockFetcherState>>,
    failed_once: Mutex<HashMap<String, bool>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            state: Arc::new(Mutex::new(MockFetcherState::default())),
            failed_once: Mutex::new(HashMap::new()),
        }
    }

    /// Serve an HTML page at a URL.
    pub fn with_html(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.with_page(url, 200, html, "text/html; charset=utf-8", Duration::ZERO, false)
    }

    /// Serve a non-HTML body (robots.txt, sitemaps) at a URL.
    pub fn with_body(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.with_page(url, 200, body, "text/plain", Duration::ZERO, false)
    }

    /// Serve a bare status code at a URL.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.with_page(url, status, "", "text/html", Duration::ZERO, false)
    }

    /// Serve HTML after a delay (for concurrency and cancellation tests).
    pub fn with_delayed_html(
        self,
        url: impl Into<String>,
        html: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.with_page(url, 200, html, "text/html", delay, false)
    }

    /// First call fails with a transient network error, second succeeds.
    pub fn flaky_then_ok(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.with_page(url, 200, html, "text/html", Duration::ZERO, true)
    }

    fn with_page(
        mut self,
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
        content_type: &str,
        delay: Duration,
        fail_first: bool,
    ) -> Self {
        self.pages.insert(
            url.into(),
            MockPage {
                status,
                body: body.into(),
                content_type: content_type.to_string(),
                delay,
                fail_first,
            },
        );
        self
    }

    /// How many times a URL was requested.
    pub fn call_count(&self, url: &str) -> usize {
        self.state.lock().unwrap().calls.get(url).copied().unwrap_or(0)
    }

    /// Total requests across all URLs.
    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// High-water mark of concurrent in-flight fetches.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_concurrent
    }

    fn lookup(&self, url: &str) -> Option<MockPage> {
        // Tolerate trailing-slash differences between fixtures and
        // normalized URLs.
        self.pages
            .get(url)
            .or_else(|| self.pages.get(url.trim_end_matches('/')))
            .or_else(|| self.pages.get(&format!("{url}/")))
            .cloned()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchFailure> {
        {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(url.to_string()).or_insert(0) += 1;
            state.current += 1;
            state.max_concurrent = state.max_concurrent.max(state.current);
        }

        // Decrement the in-flight counter however this function exits.
        struct Guard(Arc<Mutex<MockFetcherState>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.lock().unwrap().current -= 1;
            }
        }
        let _guard = Guard(Arc::clone(&self.state));

        let Some(page) = self.lookup(url) else {
            return Err(FetchFailure::HttpStatus { status: 404 });
        };

        if page.fail_first {
            let mut failed = self.failed_once.lock().unwrap();
            let done = failed.entry(url.to_string()).or_insert(false);
            if !*done {
                *done = true;
                return Err(FetchFailure::Network("connection reset".into()));
            }
        }

        if !page.delay.is_zero() {
            if page.delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(FetchFailure::Timeout);
            }
            tokio::time::sleep(page.delay).await;
        }

        match page.status {
            200 => Ok(FetchedBody {
                status: 200,
                content_type: Some(page.content_type),
                bytes_read: page.body.len(),
                body: page.body,
                final_url: url.to_string(),
            }),
            403 | 429 => Err(FetchFailure::Blocked { status: page.status }),
            status => Err(FetchFailure::HttpStatus { status }),
        }
    }
}

// ============================================================================
// MockSearchProvider
// ============================================================================

#[derive(Default)]
struct MockSearchState {
    calls: usize,
}

/// Scripted search provider.
pub struct MockSearchProvider {
    name: String,
    rpm: u32,
    hits: HashMap<String, Vec<SearchHit>>,
    fail: bool,
    state: Arc<Mutex<MockSearchState>>,
}

impl MockSearchProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rpm: 60,
            hits: HashMap::new(),
            fail: false,
            state: Arc::new(Mutex::new(MockSearchState::default())),
        }
    }

    /// Script hits for a query (matched on the normalized query).
    pub fn with_hits(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(normalize_query(query), hits);
        self
    }

    /// Declare a smaller rate limit.
    pub fn with_rpm(mut self, rpm: u32) -> Self {
        self.rpm = rpm;
        self
    }

    /// Fail every call.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            version: "test".to_string(),
            requests_per_minute: self.rpm,
            supports_date_filter: false,
            supports_domain_filter: false,
        }
    }

    async fn search(&self, query: &str, _params: &SearchParams) -> SearchResult<Vec<SearchHit>> {
        self.state.lock().unwrap().calls += 1;
        if self.fail {
            return Err(SearchError::Provider {
                provider: self.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self
            .hits
            .get(&normalize_query(query))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Failing stores (commit-ordering tests)
// ============================================================================

/// A document store whose writes can be made to fail on demand.
pub struct FailingDocumentStore {
    inner: InMemoryDocumentStore,
    fail_puts: AtomicBool,
}

impl Default for FailingDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FailingDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn put(&self, company: &Company) -> PersistResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PersistenceError::DocumentStoreFailed(
                "injected write failure".into(),
            ));
        }
        self.inner.put(company).await
    }

    async fn get(&self, id: CompanyId) -> PersistResult<Option<Company>> {
        self.inner.get(id).await
    }

    async fn find_by_canonical(&self, key: &str) -> PersistResult<Option<Company>> {
        self.inner.find_by_canonical(key).await
    }

    async fn delete(&self, id: CompanyId) -> PersistResult<()> {
        self.inner.delete(id).await
    }
}

/// Counts upsert attempts and can fail the first `n` of them.
pub struct CountingVectorStore<S> {
    inner: S,
    fail_remaining: AtomicUsize,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl<S> CountingVectorStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_remaining: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: crate::vector::VectorStore> crate::vector::VectorStore for CountingVectorStore<S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn schema(&self) -> &crate::vector::MetadataSchema {
        self.inner.schema()
    }

    async fn upsert(&self, record: crate::vector::VectorRecord) -> PersistResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PersistenceError::UpsertFailed("injected upsert failure".into()));
        }
        self.inner.upsert(record).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &[crate::vector::Filter],
    ) -> PersistResult<Vec<crate::vector::QueryMatch>> {
        self.inner.query(vector, k, filter).await
    }

    async fn fetch(&self, id: CompanyId) -> PersistResult<Option<crate::vector::VectorRecord>> {
        self.inner.fetch(id).await
    }

    async fn delete(&self, id: CompanyId) -> PersistResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn update_metadata(
        &self,
        id: CompanyId,
        patch: indexmap::IndexMap<String, crate::vector::MetadataValue>,
    ) -> PersistResult<()> {
        self.inner.update_metadata(id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_serves_scripted_completions_fifo() {
        let llm = MockLlm::new(4).with_completion("first").with_completion("second");
        let request = CompletionRequest::new("m", "p");
        assert_eq!(llm.complete(&request).await.unwrap().text, "first");
        assert_eq!(llm.complete(&request).await.unwrap().text, "second");
        assert_eq!(llm.complete(&request).await.unwrap().text, "{}");
        assert_eq!(llm.completion_calls(), 3);
    }

    #[tokio::test]
    async fn mock_llm_embeddings_are_deterministic() {
        let llm = MockLlm::new(16);
        let a = llm.embed("same text", "m").await.unwrap();
        let b = llm.embed("same text", "m").await.unwrap();
        let c = llm.embed("other text", "m").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_ne!(a.vector, c.vector);
        assert_eq!(a.dim, 16);
    }

    #[tokio::test]
    async fn mock_fetcher_404s_unknown_urls() {
        let fetcher = MockFetcher::new();
        let err = fetcher
            .get("https://unknown.example/", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchFailure::HttpStatus { status: 404 }));
    }

    #[tokio::test]
    async fn mock_fetcher_tolerates_trailing_slash() {
        let fetcher = MockFetcher::new().with_html("https://acme.com/", "<p>hi</p>");
        assert!(fetcher.get("https://acme.com", Duration::from_secs(1)).await.is_ok());
    }
}
