//! Candidate-link extraction from HTML.
//!
//! Both fetchers report the same candidate set: anchor `href`s plus the
//! document-relative `src` of frames and scripts. Non-web schemes
//! (`javascript:`, `mailto:`, `data:`) never survive canonicalisation.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

use crate::canon;

/// Extract absolute, canonical link candidates from an HTML body.
///
/// Order follows document order; duplicates on the same page are dropped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for (selector, attr) in [
        (anchor_selector(), "href"),
        (frame_selector(), "src"),
        (script_selector(), "src"),
    ] {
        for element in document.select(selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            match canon::canonicalize_relative(base, raw) {
                Ok(url) => {
                    if seen.insert(url.as_str().to_string()) {
                        links.push(url);
                    }
                }
                Err(err) => trace!(candidate = raw, %err, "dropping link candidate"),
            }
        }
    }

    links
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector"))
}

fn frame_selector() -> &'static Selector {
    static SELECTOR: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("frame[src], iframe[src]").expect("static selector"))
}

fn script_selector() -> &'static Selector {
    static SELECTOR: std::sync::OnceLock<Selector> = std::sync::OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("script[src]").expect("static selector"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        canon::canonicalize("http://example.test/docs/").unwrap()
    }

    #[test]
    fn collects_anchors_frames_and_scripts() {
        let html = r#"
            <html><body>
              <a href="guide">Guide</a>
              <a href="/api/index.html">API</a>
              <iframe src="embed.html"></iframe>
              <script src="app.js"></script>
            </body></html>"#;
        let links = extract_links(html, &base());
        let urls: Vec<_> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "http://example.test/docs/guide",
                "http://example.test/api/index.html",
                "http://example.test/docs/embed.html",
                "http://example.test/docs/app.js",
            ]
        );
    }

    #[test]
    fn skips_non_web_schemes() {
        let html = r#"
            <a href="javascript:void(0)">x</a>
            <a href="mailto:doc@example.test">m</a>
            <a href="data:text/plain,hi">d</a>
            <a href="real.html">r</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "http://example.test/docs/real.html");
    }

    #[test]
    fn dedupes_repeated_candidates() {
        let html = r#"<a href="a">1</a><a href="a#top">2</a><a href="./a">3</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1, "fragment and dot variants collapse");
    }

    #[test]
    fn cross_authority_links_are_still_reported() {
        // Scope filtering is the engine's job, not the extractor's.
        let html = r#"<a href="http://other.test/c">ext</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links[0].as_str(), "http://other.test/c");
    }
}
