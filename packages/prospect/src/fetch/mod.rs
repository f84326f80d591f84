//! HTTP fetching: the raw fetcher seam and the bounded parallel fetcher.

pub mod html;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::FetchFailure;
use crate::security::UrlValidator;
use crate::types::PageContent;

/// One retry on transient failures, with a jittered pause first.
const RETRY_BACKOFF_MS: u64 = 500;

/// A fetched HTTP body with transport metadata.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub bytes_read: usize,

    /// URL after redirects, for base resolution.
    pub final_url: String,
}

/// The raw HTTP seam.
///
/// Implementations honor the deadline, cap the body size, and map failures
/// to [`FetchFailure`] values. Tests plug in a scripted implementation.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchFailure>;
}

/// reqwest-backed fetcher with a streaming byte cap and SSRF validation.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    validator: UrlValidator,
    user_agent: String,
    byte_cap: usize,
}

impl HttpPageFetcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            validator: UrlValidator::new(),
            user_agent: config.user_agent.clone(),
            byte_cap: config.per_page_bytes,
        }
    }

    /// Replace the SSRF validator (tests allow localhost).
    pub fn with_validator(mut self, validator: UrlValidator) -> Self {
        self.validator = validator;
        self
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchFailure> {
        self.validator
            .validate_with_dns(url)
            .await
            .map_err(|e| FetchFailure::Security(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchFailure::Timeout
                } else {
                    FetchFailure::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 403 || status == 429 {
            return Err(FetchFailure::Blocked { status });
        }
        if !response.status().is_success() {
            return Err(FetchFailure::HttpStatus { status });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // A declared length over the cap is refused outright; otherwise the
        // body is streamed and truncated at the cap (partial result).
        if let Some(len) = response.content_length() {
            if len as usize > self.byte_cap {
                return Err(FetchFailure::BodyCapExceeded);
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = self.byte_cap.saturating_sub(bytes.len());
                    if chunk.len() >= remaining {
                        bytes.extend_from_slice(&chunk[..remaining]);
                        tracing::debug!(url = %url, cap = self.byte_cap, "body truncated at byte cap");
                        break;
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    if e.is_timeout() {
                        return Err(FetchFailure::Timeout);
                    }
                    return Err(FetchFailure::Network(e.to_string()));
                }
            }
        }

        let bytes_read = bytes.len();
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(FetchedBody {
            status,
            content_type,
            body,
            bytes_read,
            final_url,
        })
    }
}

/// The outcome of fetching one selected URL.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(PageContent),
    Failed { url: String, failure: FetchFailure },
}

impl FetchOutcome {
    pub fn page(&self) -> Option<&PageContent> {
        match self {
            Self::Success(page) => Some(page),
            Self::Failed { .. } => None,
        }
    }
}

/// Bounded-concurrency fetcher for the selected URL list.
///
/// Never exceeds its permit count of in-flight requests, returns results in
/// completion order, and honors cancellation within one round-trip: workers
/// abort their current request and drain without starting new work.
pub struct ParallelFetcher {
    fetcher: Arc<dyn PageFetcher>,
    parallelism: usize,
    per_fetch_timeout: Duration,
    per_page_chars: usize,
}

impl ParallelFetcher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            parallelism: config.fetcher_parallelism.max(1),
            per_fetch_timeout: config.fetch_timeout(),
            per_page_chars: config.per_page_chars,
        }
    }

    /// Fetch all URLs with bounded parallelism.
    ///
    /// `on_progress(done, total)` fires after each URL settles. Per-URL
    /// failures are returned as values; only the caller decides whether an
    /// all-failed run is fatal.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
        on_progress: impl Fn(usize, usize) + Send + Sync,
    ) -> Vec<FetchOutcome> {
        let total = urls.len();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut in_flight = FuturesUnordered::new();

        for url in urls.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let timeout = self.per_fetch_timeout;
            let char_cap = self.per_page_chars;

            in_flight.push(async move {
                // Permits keep flowing after cancellation; the token check
                // below drains queued URLs without fetching them.
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return FetchOutcome::Failed {
                            url,
                            failure: FetchFailure::Network("fetch pool closed".into()),
                        }
                    }
                };
                if cancel.is_cancelled() {
                    return FetchOutcome::Failed {
                        url,
                        failure: FetchFailure::Network("cancelled before fetch".into()),
                    };
                }

                fetch_one(fetcher.as_ref(), &url, timeout, char_cap, &cancel).await
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
            on_progress(outcomes.len(), total);
        }
        outcomes
    }
}

/// Fetch one URL with a single retry on transient failures.
async fn fetch_one(
    fetcher: &dyn PageFetcher,
    url: &str,
    timeout: Duration,
    char_cap: usize,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return FetchOutcome::Failed {
                    url: url.to_string(),
                    failure: FetchFailure::Network("cancelled mid-fetch".into()),
                };
            }
            result = fetcher.get(url, timeout) => result,
        };

        match result {
            Ok(body) => {
                let is_html = body
                    .content_type
                    .as_deref()
                    .map(|ct| ct.contains("html"))
                    .unwrap_or(true);
                let text = if is_html {
                    html::extract_text(&body.body)
                } else {
                    body.body.clone()
                };
                let title = is_html.then(|| html::extract_title(&body.body)).flatten();

                tracing::debug!(
                    url = %url,
                    status = body.status,
                    bytes = body.bytes_read,
                    chars = text.len(),
                    "page fetched"
                );

                return FetchOutcome::Success(PageContent {
                    url: url.to_string(),
                    fetched_at: Utc::now(),
                    status: body.status,
                    content_type: body.content_type,
                    title,
                    text: html::truncate_chars(&text, char_cap),
                    bytes_read: body.bytes_read,
                    fetch_duration: started.elapsed(),
                });
            }
            Err(failure) if failure.is_transient() && attempt == 0 && !cancel.is_cancelled() => {
                attempt += 1;
                tracing::debug!(url = %url, failure = %failure, "transient fetch failure, retrying");
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS + jitter_ms())).await;
            }
            Err(failure) => {
                tracing::warn!(url = %url, failure = %failure, kind = failure.kind(), "fetch failed");
                return FetchOutcome::Failed {
                    url: url.to_string(),
                    failure,
                };
            }
        }
    }
}

/// Sub-250ms jitter derived from the clock's subsecond nanos.
fn jitter_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 250)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    fn test_config(parallelism: usize) -> EngineConfig {
        EngineConfig {
            fetcher_parallelism: parallelism,
            fetch_timeout_s: 2,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn fetches_all_and_reports_progress() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_html("https://example.com/a", "<p>Alpha</p>")
                .with_html("https://example.com/b", "<p>Beta</p>"),
        );
        let parallel = ParallelFetcher::new(Arc::clone(&fetcher) as Arc<dyn PageFetcher>, &test_config(4));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);

        let outcomes = parallel
            .fetch_all(
                &[
                    "https://example.com/a".to_string(),
                    "https://example.com/b".to_string(),
                ],
                &CancellationToken::new(),
                move |done, total| seen_in_cb.lock().unwrap().push((done, total)),
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.page().is_some()));
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let mut fetcher = MockFetcher::new();
        for i in 0..20 {
            fetcher = fetcher.with_delayed_html(
                format!("https://example.com/{i}"),
                "<p>page</p>",
                Duration::from_millis(30),
            );
        }
        let fetcher = Arc::new(fetcher);
        let parallel = ParallelFetcher::new(Arc::clone(&fetcher) as Arc<dyn PageFetcher>, &test_config(3));

        let urls: Vec<String> = (0..20).map(|i| format!("https://example.com/{i}")).collect();
        let outcomes = parallel
            .fetch_all(&urls, &CancellationToken::new(), |_, _| {})
            .await;

        assert_eq!(outcomes.len(), 20);
        assert!(
            fetcher.max_concurrent() <= 3,
            "observed {} concurrent fetches",
            fetcher.max_concurrent()
        );
    }

    #[tokio::test]
    async fn per_url_failures_are_values() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_html("https://example.com/ok", "<p>fine</p>")
                .with_status("https://example.com/gone", 404)
                .with_status("https://example.com/blocked", 403),
        );
        let parallel = ParallelFetcher::new(fetcher, &test_config(4));

        let outcomes = parallel
            .fetch_all(
                &[
                    "https://example.com/ok".to_string(),
                    "https://example.com/gone".to_string(),
                    "https://example.com/blocked".to_string(),
                ],
                &CancellationToken::new(),
                |_, _| {},
            )
            .await;

        let successes = outcomes.iter().filter(|o| o.page().is_some()).count();
        assert_eq!(successes, 1);

        let kinds: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| match o {
                FetchOutcome::Failed { failure, .. } => Some(failure.kind()),
                _ => None,
            })
            .collect();
        assert!(kinds.contains(&"FetchHttpStatus"));
        assert!(kinds.contains(&"RobotsBlocked"));
    }

    #[tokio::test]
    async fn transient_failures_get_one_retry() {
        let fetcher = Arc::new(
            MockFetcher::new().flaky_then_ok("https://example.com/flaky", "<p>recovered</p>"),
        );
        let parallel = ParallelFetcher::new(Arc::clone(&fetcher) as Arc<dyn PageFetcher>, &test_config(2));

        let outcomes = parallel
            .fetch_all(
                &["https://example.com/flaky".to_string()],
                &CancellationToken::new(),
                |_, _| {},
            )
            .await;

        assert!(outcomes[0].page().is_some());
        assert_eq!(fetcher.call_count("https://example.com/flaky"), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_promptly() {
        let mut fetcher = MockFetcher::new();
        for i in 0..10 {
            fetcher = fetcher.with_delayed_html(
                format!("https://example.com/{i}"),
                "<p>slow</p>",
                Duration::from_secs(2),
            );
        }
        let fetcher = Arc::new(fetcher);
        let parallel = ParallelFetcher::new(Arc::clone(&fetcher) as Arc<dyn PageFetcher>, &test_config(4));

        let cancel = CancellationToken::new();
        let cancel_after = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_after.cancel();
        });

        let urls: Vec<String> = (0..10).map(|i| format!("https://example.com/{i}")).collect();
        let started = Instant::now();
        let outcomes = parallel.fetch_all(&urls, &cancel, |_, _| {}).await;

        assert!(started.elapsed() < Duration::from_secs(1), "cancel was not prompt");
        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.page().is_none()));
        // At most `parallelism` fetches ever started
        assert!(fetcher.max_concurrent() <= 4);
    }
}
