//! Sitemap XML parsing.
//!
//! Handles both `<urlset>` documents and `<sitemapindex>` references.
//! Regex extraction of `<loc>` values is enough here; sitemaps in the wild
//! are too inconsistent to deserve a strict XML parser for this use.

use regex::Regex;

/// A parsed sitemap document.
#[derive(Debug, Clone)]
pub struct Sitemap {
    /// True for `<sitemapindex>` documents whose locs are further sitemaps.
    pub is_index: bool,

    /// Extracted `<loc>` values, in document order.
    pub locations: Vec<String>,
}

/// Parse a sitemap or sitemap-index document.
pub fn parse_sitemap(xml: &str) -> Sitemap {
    let is_index = xml.contains("<sitemapindex");

    let loc_pattern = Regex::new(r"(?is)<loc[^>]*>\s*(.*?)\s*</loc>").unwrap();
    let locations = loc_pattern
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|m| decode_xml_entities(m.as_str().trim()))
        .filter(|loc| !loc.is_empty())
        .collect();

    Sitemap { is_index, locations }
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc><lastmod>2026-01-01</lastmod></url>
  <url><loc> https://example.com/about </loc></url>
  <url><loc>https://example.com/products?line=a&amp;x=1</loc></url>
</urlset>"#;

        let sitemap = parse_sitemap(xml);
        assert!(!sitemap.is_index);
        assert_eq!(sitemap.locations.len(), 3);
        assert_eq!(sitemap.locations[1], "https://example.com/about");
        assert_eq!(sitemap.locations[2], "https://example.com/products?line=a&x=1");
    }

    #[test]
    fn parses_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-pages.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemap-posts.xml</loc></sitemap>
</sitemapindex>"#;

        let sitemap = parse_sitemap(xml);
        assert!(sitemap.is_index);
        assert_eq!(sitemap.locations.len(), 2);
    }

    #[test]
    fn garbage_yields_empty() {
        let sitemap = parse_sitemap("<html><body>404 not found</body></html>");
        assert!(sitemap.locations.is_empty());
    }
}
