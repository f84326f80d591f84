//! Page types - discovered candidates and fetched content.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// How a candidate URL was discovered.
///
/// Ordering reflects selection priority: sitemap entries are the most
/// trustworthy signal of site structure, recursively crawled links the
/// least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Sitemap,
    Robots,
    Seed,
    Recursive,
}

/// A URL enumerated during link discovery that may be fetched later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCandidate {
    /// Normalized absolute URL (see [`normalize_url`]).
    pub url: String,

    /// Where this URL was discovered.
    pub source: DiscoverySource,

    /// Crawl depth from the homepage (0 = homepage itself).
    pub depth: usize,

    /// Anchor text of the first link pointing at this URL, when cheap to
    /// capture. Fed to the page selector prompt.
    pub anchor_text: Option<String>,

    /// Whether robots.txt disallows this path. Advisory only; recorded for
    /// observability, never used to refuse the homepage.
    pub robots_blocked: bool,

    /// When the URL was discovered.
    pub discovered_at: DateTime<Utc>,
}

impl PageCandidate {
    /// Create a candidate with the current timestamp.
    pub fn new(url: impl Into<String>, source: DiscoverySource, depth: usize) -> Self {
        Self {
            url: url.into(),
            source,
            depth,
            anchor_text: None,
            robots_blocked: false,
            discovered_at: Utc::now(),
        }
    }

    /// Attach anchor text.
    pub fn with_anchor_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.anchor_text = Some(text.trim().to_string());
        }
        self
    }

    /// Mark the candidate as disallowed by robots.txt.
    pub fn blocked(mut self) -> Self {
        self.robots_blocked = true;
        self
    }

    /// Path component of the URL, for heuristic ranking.
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }
}

/// The extracted content of one fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    /// Normalized URL that was fetched.
    pub url: String,

    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,

    /// HTTP status of the response.
    pub status: u16,

    /// Content-Type header, if present.
    pub content_type: Option<String>,

    /// Page title, if the document had one.
    pub title: Option<String>,

    /// Main-content text with boilerplate removed, truncated to the
    /// per-page character cap.
    pub text: String,

    /// Bytes read off the wire (may be below the full body on cap).
    pub bytes_read: usize,

    /// Wall time of the fetch.
    pub fetch_duration: Duration,
}

/// Normalize a URL for identity comparison.
///
/// Scheme and host are lowercased, default ports removed, the fragment is
/// stripped. The trailing slash on the path is preserved exactly as given.
/// Normalization is idempotent.
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Reduce a URL to its scheme+host form (the canonical website identity).
pub fn site_root(raw: &str) -> Result<String, url::ParseError> {
    let url = Url::parse(raw.trim())?;
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => Ok(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Ok(format!("{}://{}", url.scheme(), host)),
    }
}

/// Registrable-domain comparison: `blog.example.com` belongs to
/// `example.com`, `example.org` does not.
pub fn same_registrable_domain(a: &Url, b: &Url) -> bool {
    fn tail(host: &str) -> String {
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() <= 2 {
            host.to_string()
        } else {
            parts[parts.len() - 2..].join(".")
        }
    }

    match (a.host_str(), b.host_str()) {
        (Some(ha), Some(hb)) => tail(&ha.to_lowercase()) == tail(&hb.to_lowercase()),
        _ => false,
    }
}

/// Extensions that never contain extractable text.
const ASSET_EXTENSIONS: &[&str] = &[
    ".pdf", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".zip", ".gz", ".tar",
    ".mp3", ".mp4", ".mov", ".avi", ".webm", ".css", ".js", ".json", ".xml", ".woff", ".woff2",
    ".ttf", ".eot", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".dmg", ".exe",
];

/// Path fragments that mark navigation noise rather than content.
const NOISE_FRAGMENTS: &[&str] = &[
    "/login", "/signin", "/sign-in", "/signup", "/sign-up", "/register", "/cart", "/checkout",
    "/search", "/wp-login", "/wp-admin", "/account", "/logout",
];

/// Whether a URL is worth fetching for intelligence extraction.
pub fn is_crawlable_url(url: &Url) -> bool {
    let path = url.path().to_lowercase();

    if ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    if NOISE_FRAGMENTS.iter().any(|frag| path.contains(frag)) {
        return false;
    }
    // Search-result fragments hide behind query parameters too.
    if let Some(query) = url.query() {
        if query.starts_with("s=") || query.contains("&s=") || query.contains("search=") {
            return false;
        }
    }
    true
}
