//! Second search phase: structural extraction with a CSS selector.
//!
//! Parses HTML tolerantly, takes the whitespace-normalised text of every
//! element matching the selector, and optionally filters by a keyword
//! conjunction. A selector that fails to parse is the caller's mistake and
//! surfaces as [`SearchError::InvalidSelector`].

use scraper::{Html, Selector};

use super::SearchError;

/// Fail fast on malformed selectors before any file is touched.
pub fn validate_selector(selector: &str) -> Result<(), SearchError> {
    parse_selector(selector).map(|_| ())
}

/// Text of every element in `html` matching `selector`, in document order.
/// With keywords, only texts containing every keyword survive.
pub fn extract(
    html: &str,
    selector: &str,
    keywords: &[String],
) -> Result<Vec<String>, SearchError> {
    let selector = parse_selector(selector)?;
    let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    let document = Html::parse_document(html);
    let mut texts = Vec::new();
    for element in document.select(&selector) {
        let text = normalise(element.text());
        if text.is_empty() {
            continue;
        }
        if !needles.is_empty() {
            let lowered = text.to_lowercase();
            if !needles.iter().all(|needle| lowered.contains(needle)) {
                continue;
            }
        }
        texts.push(text);
    }
    Ok(texts)
}

fn parse_selector(selector: &str) -> Result<Selector, SearchError> {
    Selector::parse(selector).map_err(|err| SearchError::InvalidSelector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

/// Concatenate descendant text nodes and collapse runs of whitespace.
fn normalise<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title>Guide</title></head><body>
          <h2>Install</h2>
          <p>Run  the
             installer.</p>
          <h2>Configure <em>now</em></h2>
          <p>Edit the file.</p>
        </body></html>"#;

    #[test]
    fn extracts_matching_elements_in_document_order() {
        let texts = extract(PAGE, "h2", &[]).unwrap();
        assert_eq!(texts, vec!["Install", "Configure now"]);
    }

    #[test]
    fn text_is_whitespace_normalised_across_nodes() {
        let texts = extract(PAGE, "p", &[]).unwrap();
        assert_eq!(texts[0], "Run the installer.");
    }

    #[test]
    fn keyword_filter_is_a_case_insensitive_conjunction() {
        let texts = extract(PAGE, "h2", &["CONFIGURE".to_string(), "now".to_string()]).unwrap();
        assert_eq!(texts, vec!["Configure now"]);
    }

    #[test]
    fn no_matches_yields_empty_not_error() {
        let texts = extract(PAGE, "table", &[]).unwrap();
        assert!(texts.is_empty());
    }

    #[test]
    fn malformed_selector_is_a_client_error() {
        let err = extract(PAGE, "h2[[", &[]).unwrap_err();
        assert!(matches!(err, SearchError::InvalidSelector { .. }));
        assert!(validate_selector("div > p:nth-child(2)").is_ok());
    }

    #[test]
    fn wildcard_selector_sees_page_text() {
        let texts = extract(PAGE, "*", &[]).unwrap();
        assert!(texts.iter().any(|t| t.contains("Run the installer.")));
    }
}
