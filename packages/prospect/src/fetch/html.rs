//! Main-content extraction from HTML.
//!
//! Deliberately regex-based: the engine only needs readable text for LLM
//! consumption, not a faithful DOM. Script, style, and chrome elements are
//! stripped; headings and list items keep light structure.

use regex::Regex;

/// Extract the page title.
pub fn extract_title(html: &str) -> Option<String> {
    let title_pattern = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    title_pattern
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| decode_entities(m.as_str()).trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract `<a href>` links with their anchor text, unresolved.
pub fn extract_links(html: &str) -> Vec<(String, String)> {
    let link_pattern =
        Regex::new(r#"(?is)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap();

    let mut links = Vec::new();
    for cap in link_pattern.captures_iter(html) {
        let href = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();

        // Skip anchors, javascript, mailto, tel
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let anchor = cap
            .get(2)
            .map(|m| strip_tags(m.as_str()))
            .unwrap_or_default();
        links.push((href.to_string(), anchor));
    }
    links
}

/// Convert HTML into plain text with boilerplate removed.
pub fn extract_text(html: &str) -> String {
    let mut text = html.to_string();

    // Drop non-content elements wholesale.
    for tag in ["script", "style", "noscript", "svg", "nav", "header", "footer", "form"] {
        let pattern = Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).unwrap();
        text = pattern.replace_all(&text, " ").to_string();
    }
    let comment_pattern = Regex::new(r"(?s)<!--.*?-->").unwrap();
    text = comment_pattern.replace_all(&text, " ").to_string();

    // Keep light structure for headings and list items.
    let h_pattern = Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>").unwrap();
    text = h_pattern.replace_all(&text, "\n$1\n").to_string();
    let li_pattern = Regex::new(r"(?is)<li[^>]*>(.*?)</li>").unwrap();
    text = li_pattern.replace_all(&text, "\n- $1").to_string();

    // Block-level closings become line breaks.
    let block_pattern = Regex::new(r"(?i)</(p|div|section|article|tr|table|ul|ol)>|<br\s*/?>").unwrap();
    text = block_pattern.replace_all(&text, "\n").to_string();

    // Remove remaining tags.
    let tag_pattern = Regex::new(r"<[^>]+>").unwrap();
    text = tag_pattern.replace_all(&text, " ").to_string();

    text = decode_entities(&text);

    // Collapse whitespace: spaces within lines, runs of blank lines.
    let spaces = Regex::new(r"[ \t]+").unwrap();
    text = spaces.replace_all(&text, " ").to_string();
    let blank_lines = Regex::new(r"\n\s*\n\s*(\n\s*)*").unwrap();
    text = blank_lines.replace_all(&text, "\n\n").to_string();

    text.trim().to_string()
}

/// Truncate to a character cap on a char boundary.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}

fn strip_tags(html: &str) -> String {
    let tag_pattern = Regex::new(r"<[^>]+>").unwrap();
    let stripped = tag_pattern.replace_all(html, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&rsquo;", "'")
        .replace("&mdash;", "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title() {
        let html = "<html><head><title> Visterra Inc &amp; Co </title></head></html>";
        assert_eq!(extract_title(html), Some("Visterra Inc & Co".to_string()));
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn extracts_links_with_anchor_text() {
        let html = r##"
            <a href="/about">About <b>Us</b></a>
            <a href="https://example.com/team">Team</a>
            <a href="#section">Anchor</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:hi@example.com">Mail</a>
        "##;
        let links = extract_links(html);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], ("/about".to_string(), "About Us".to_string()));
        assert_eq!(links[1].0, "https://example.com/team");
    }

    #[test]
    fn strips_boilerplate_elements() {
        let html = r#"
            <html><head><style>.x { color: red }</style></head>
            <body>
            <nav><a href="/">Home</a><a href="/about">About</a></nav>
            <script>analytics();</script>
            <h1>Antibody Therapeutics</h1>
            <p>We discover novel medicines.</p>
            <footer>© 2026 Example</footer>
            </body></html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Antibody Therapeutics"));
        assert!(text.contains("We discover novel medicines."));
        assert!(!text.contains("analytics"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("© 2026"));
        assert!(!text.contains("Home"));
    }

    #[test]
    fn list_items_keep_structure() {
        let html = "<ul><li>Biologics</li><li>Vaccines</li></ul>";
        let text = extract_text(html);
        assert!(text.contains("- Biologics"));
        assert!(text.contains("- Vaccines"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_chars(text, 4);
        assert_eq!(truncated, "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
