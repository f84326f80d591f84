//! robots.txt parsing.
//!
//! The discoverer uses robots.txt for two things: sitemap locations and an
//! advisory `blocked` flag on candidates. Disallow rules never stop the
//! homepage from being crawled; they are recorded for observability.

use std::time::Duration;

/// Parsed robots.txt directives relevant to discovery.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Disallow prefixes for `User-agent: *`.
    disallow: Vec<String>,

    /// Allow prefixes for `User-agent: *` (override disallow).
    allow: Vec<String>,

    /// Crawl delay, recorded but not enforced.
    crawl_delay: Option<f64>,

    /// Sitemap URLs listed anywhere in the file.
    sitemaps: Vec<String>,
}

impl RobotsTxt {
    /// Parse robots.txt content. Only the wildcard agent group matters for
    /// this engine; sitemap directives are global by definition.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut in_wildcard_group = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    in_wildcard_group = value == "*";
                }
                "disallow" if in_wildcard_group && !value.is_empty() => {
                    robots.disallow.push(value.to_string());
                }
                "allow" if in_wildcard_group && !value.is_empty() => {
                    robots.allow.push(value.to_string());
                }
                "crawl-delay" if in_wildcard_group => {
                    if let Ok(delay) = value.parse::<f64>() {
                        robots.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    robots.sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        robots
    }

    /// Whether the wildcard rules disallow a path. Allow rules take
    /// precedence over disallow rules.
    pub fn is_disallowed(&self, path: &str) -> bool {
        if self.allow.iter().any(|a| path.starts_with(a.as_str())) {
            return false;
        }
        self.disallow
            .iter()
            .any(|d| d == "/" || path.starts_with(d.as_str()))
    }

    /// Sitemap URLs listed in the file.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Paths explicitly surfaced via Allow directives.
    pub fn allowed_paths(&self) -> Vec<String> {
        self.allow.clone()
    }

    /// Crawl delay, if declared.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay.map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# robots for example.com
User-agent: *
Disallow: /admin/
Disallow: /cart
Allow: /admin/public
Crawl-delay: 2

User-agent: BadBot
Disallow: /

Sitemap: https://example.com/sitemap.xml
Sitemap: https://example.com/news-sitemap.xml
";

    #[test]
    fn parses_wildcard_rules() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert!(robots.is_disallowed("/admin/settings"));
        assert!(robots.is_disallowed("/cart"));
        assert!(!robots.is_disallowed("/about"));
    }

    #[test]
    fn allow_overrides_disallow() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert!(!robots.is_disallowed("/admin/public/page"));
    }

    #[test]
    fn other_agent_groups_ignored() {
        let robots = RobotsTxt::parse(SAMPLE);
        // BadBot's blanket disallow must not leak into the wildcard rules
        assert!(!robots.is_disallowed("/"));
    }

    #[test]
    fn collects_sitemaps_and_delay() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert_eq!(robots.sitemaps().len(), 2);
        assert_eq!(robots.crawl_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn blanket_disallow() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /\n");
        assert!(robots.is_disallowed("/anything"));
    }

    #[test]
    fn empty_file_allows_everything() {
        let robots = RobotsTxt::parse("");
        assert!(!robots.is_disallowed("/admin"));
        assert!(robots.sitemaps().is_empty());
    }
}
