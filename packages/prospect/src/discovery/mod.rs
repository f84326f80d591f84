//! Link discovery: enumerate candidate URLs for a company domain.
//!
//! Sources, in priority order: sitemap entries, robots-surfaced paths, the
//! homepage itself, recursive crawl links. Robots and sitemap failures are
//! non-fatal; an unreachable homepage is fatal because there is no usable
//! seed. Partial results are always returned on deadline expiry.

pub mod robots;
pub mod sitemap;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{DiscoveryError, EngineError, Result};
use crate::fetch::{html, PageFetcher};
use crate::types::{
    is_crawlable_url, normalize_url, same_registrable_domain, DiscoverySource, PageCandidate,
};

use robots::RobotsTxt;
use sitemap::parse_sitemap;

/// Candidate discovery for one domain.
pub struct LinkDiscoverer {
    fetcher: Arc<dyn PageFetcher>,
    max_candidates: usize,
    max_depth: usize,
    branching: usize,
    deadline: Duration,
    fetch_timeout: Duration,
}

impl LinkDiscoverer {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            max_candidates: config.max_candidates,
            max_depth: config.max_crawl_depth,
            branching: config.crawl_branching,
            deadline: config.discovery_deadline(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    /// Enumerate candidates for `base_url` (scheme+host).
    ///
    /// Returns a deduplicated list ordered by source priority, capped at
    /// the configured maximum.
    pub async fn discover(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageCandidate>> {
        let started = Instant::now();
        let base = Url::parse(base_url).map_err(|_| EngineError::InvalidUrl {
            url: base_url.to_string(),
        })?;

        info!(url = %base, "link discovery starting");

        let mut found = CandidateSet::new(self.max_candidates);

        // 1. robots.txt: sitemap locations plus advisory disallow rules.
        // Allow-directive paths are pages the site owner chose to call out,
        // so they get their own source tier.
        let robots = self.fetch_robots(&base).await;
        for path in robots.allowed_paths() {
            if let Ok(url) = base.join(&path) {
                found.insert(&url, DiscoverySource::Robots, 0, None, &robots);
            }
        }

        // 2. Sitemaps, with /sitemap.xml as fallback, index files one level deep.
        let mut sitemap_urls: Vec<String> = robots.sitemaps().to_vec();
        if sitemap_urls.is_empty() {
            if let Ok(fallback) = base.join("/sitemap.xml") {
                sitemap_urls.push(fallback.to_string());
            }
        }
        self.walk_sitemaps(&base, &sitemap_urls, &robots, &mut found, started, cancel)
            .await;

        // 3. Homepage: the only fatal fetch in this phase.
        let homepage = match self.fetcher.get(base.as_str(), self.fetch_timeout).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %base, error = %e, "homepage unreachable");
                return Err(DiscoveryError::HomepageUnreachable {
                    url: base.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        // Redirects may move the site to a different host (example.com ->
        // www.example.com); follow the resolved base for domain checks.
        let base = Url::parse(&homepage.final_url).unwrap_or(base);
        found.insert(&base, DiscoverySource::Seed, 0, None, &robots);

        // 4. Breadth-first expansion from the homepage.
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(normalize_url(base.as_str()).unwrap_or_else(|_| base.to_string()));

        self.enqueue_links(&base, &base, &homepage.body, 1, &mut queue, &mut found, &robots);

        while let Some((url, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if found.is_full() || depth > self.max_depth {
                break;
            }
            if started.elapsed() >= self.deadline {
                info!(
                    elapsed_s = started.elapsed().as_secs(),
                    candidates = found.len(),
                    "discovery deadline reached, returning partial results"
                );
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            // Leaf depth: the URL is already a candidate, no need to fetch
            // it just to find links we will not follow.
            if depth >= self.max_depth {
                continue;
            }

            match self.fetcher.get(&url, self.fetch_timeout).await {
                Ok(body) => {
                    let page_url = Url::parse(&body.final_url)
                        .or_else(|_| Url::parse(&url))
                        .unwrap_or_else(|_| base.clone());
                    self.enqueue_links(
                        &base,
                        &page_url,
                        &body.body,
                        depth + 1,
                        &mut queue,
                        &mut found,
                        &robots,
                    );
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "crawl fetch failed, skipping");
                }
            }
        }

        let candidates = found.into_ordered();
        info!(
            url = %base,
            candidates = candidates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "link discovery completed"
        );

        if candidates.is_empty() {
            return Err(DiscoveryError::NoCandidatesFound.into());
        }
        Ok(candidates)
    }

    async fn fetch_robots(&self, base: &Url) -> RobotsTxt {
        let Ok(robots_url) = base.join("/robots.txt") else {
            return RobotsTxt::default();
        };
        match self.fetcher.get(robots_url.as_str(), self.fetch_timeout).await {
            Ok(body) if body.status == 200 => RobotsTxt::parse(&body.body),
            Ok(body) => {
                debug!(status = body.status, "robots.txt not usable");
                RobotsTxt::default()
            }
            Err(e) => {
                debug!(error = %e, "robots.txt fetch failed, continuing without it");
                RobotsTxt::default()
            }
        }
    }

    async fn walk_sitemaps(
        &self,
        base: &Url,
        sitemap_urls: &[String],
        robots: &RobotsTxt,
        found: &mut CandidateSet,
        started: Instant,
        cancel: &CancellationToken,
    ) {
        for sitemap_url in sitemap_urls {
            if cancel.is_cancelled() || found.is_full() || started.elapsed() >= self.deadline {
                return;
            }
            let parsed = match self.fetcher.get(sitemap_url, self.fetch_timeout).await {
                Ok(body) => parse_sitemap(&body.body),
                Err(e) => {
                    debug!(url = %sitemap_url, error = %e, "sitemap fetch failed, continuing");
                    continue;
                }
            };

            if parsed.is_index {
                // Follow index references one level deep only.
                for child in parsed.locations.iter().take(self.branching) {
                    if found.is_full() || started.elapsed() >= self.deadline {
                        return;
                    }
                    if let Ok(body) = self.fetcher.get(child, self.fetch_timeout).await {
                        let child_map = parse_sitemap(&body.body);
                        self.collect_sitemap_locs(base, &child_map.locations, robots, found);
                    }
                }
            } else {
                self.collect_sitemap_locs(base, &parsed.locations, robots, found);
            }
        }
    }

    fn collect_sitemap_locs(
        &self,
        base: &Url,
        locations: &[String],
        robots: &RobotsTxt,
        found: &mut CandidateSet,
    ) {
        for loc in locations {
            if found.is_full() {
                return;
            }
            if let Ok(url) = Url::parse(loc) {
                if same_registrable_domain(&url, base) {
                    found.insert(&url, DiscoverySource::Sitemap, 0, None, robots);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue_links(
        &self,
        base: &Url,
        page_url: &Url,
        html_body: &str,
        next_depth: usize,
        queue: &mut VecDeque<(String, usize)>,
        found: &mut CandidateSet,
        robots: &RobotsTxt,
    ) {
        let mut enqueued = 0usize;
        for (href, anchor) in html::extract_links(html_body) {
            if enqueued >= self.branching || found.is_full() {
                break;
            }
            let Ok(resolved) = page_url.join(&href) else {
                continue;
            };
            if !same_registrable_domain(&resolved, base) || !is_crawlable_url(&resolved) {
                continue;
            }

            let source = if next_depth <= 1 {
                DiscoverySource::Seed
            } else {
                DiscoverySource::Recursive
            };
            let anchor = (!anchor.is_empty()).then_some(anchor);
            if found.insert(&resolved, source, next_depth, anchor, robots) {
                if let Ok(normalized) = normalize_url(resolved.as_str()) {
                    queue.push_back((normalized, next_depth));
                    enqueued += 1;
                }
            }
        }
    }
}

/// Deduplicating candidate accumulator with source-priority ordering.
struct CandidateSet {
    by_url: HashMap<String, PageCandidate>,
    order: Vec<String>,
    cap: usize,
}

impl CandidateSet {
    fn new(cap: usize) -> Self {
        Self {
            by_url: HashMap::new(),
            order: Vec::new(),
            cap,
        }
    }

    fn len(&self) -> usize {
        self.by_url.len()
    }

    fn is_full(&self) -> bool {
        self.by_url.len() >= self.cap
    }

    /// Insert a candidate; returns true when the URL was new.
    fn insert(
        &mut self,
        url: &Url,
        source: DiscoverySource,
        depth: usize,
        anchor: Option<String>,
        robots: &RobotsTxt,
    ) -> bool {
        if self.is_full() || !is_crawlable_url(url) {
            return false;
        }
        let Ok(normalized) = normalize_url(url.as_str()) else {
            return false;
        };
        if self.by_url.contains_key(&normalized) {
            return false;
        }

        let mut candidate = PageCandidate::new(normalized.clone(), source, depth);
        if let Some(anchor) = anchor {
            candidate = candidate.with_anchor_text(anchor);
        }
        if robots.is_disallowed(url.path()) {
            candidate = candidate.blocked();
        }

        self.order.push(normalized.clone());
        self.by_url.insert(normalized, candidate);
        true
    }

    /// Drain into a list ordered by source priority, then depth, then
    /// discovery order (the sort is stable).
    fn into_ordered(mut self) -> Vec<PageCandidate> {
        let mut candidates: Vec<PageCandidate> = self
            .order
            .iter()
            .filter_map(|url| self.by_url.remove(url))
            .collect();
        candidates.sort_by_key(|c| (c.source, c.depth));
        candidates
    }
}
