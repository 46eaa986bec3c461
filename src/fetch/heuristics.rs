//! Content classification heuristics.
//!
//! Two classifiers run over decoded bodies: the JS-shell detector that
//! drives the browser-render fallback, and the paywall/login detector that
//! turns a nominally successful fetch into `failed_paywall`.

use scraper::{Html, Selector};

/// Bodies at or above this length are never considered JS shells.
pub const JS_SHELL_MAX_BODY_LEN: usize = 1024;

/// Maximum non-whitespace text nodes outside the mount element.
pub const JS_SHELL_MAX_TEXT_NODES: usize = 3;

/// Window, in characters of normalised text, within which two paywall
/// markers count as "in close proximity".
const PAYWALL_PROXIMITY: usize = 600;

/// Marker phrases searched for in lowercased, whitespace-normalised text.
const PAYWALL_MARKERS: [&str; 4] = ["sign in", "log in", "subscribe", "create account"];

/// Detect a client-side rendering shell: a near-empty skeleton with exactly
/// one `#root`/`#app` mount point and almost no text outside it.
pub fn is_js_shell(html: &str, max_body_len: usize, max_text_nodes: usize) -> bool {
    if html.len() >= max_body_len {
        return false;
    }

    let document = Html::parse_document(html);
    let mount_selector = Selector::parse("#root, #app").expect("static selector");

    let mounts: Vec<_> = document.select(&mount_selector).collect();
    if mounts.len() != 1 {
        return false;
    }
    let mount_id = mounts[0].id();

    let mut outside_text_nodes = 0usize;
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        let inside_mount = node.ancestors().any(|a| a.id() == mount_id);
        if !inside_mount {
            outside_text_nodes += 1;
            if outside_text_nodes >= max_text_nodes {
                return false;
            }
        }
    }

    true
}

/// Detect a paywall or login wall: two distinct markers (a password field
/// counts as one) close together in the page text.
pub fn is_paywalled(html: &str) -> bool {
    let document = Html::parse_document(html);

    let password_selector =
        Selector::parse(r#"input[type="password"]"#).expect("static selector");
    let has_password_field = document.select(&password_selector).next().is_some();

    let text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hits: Vec<(usize, &str)> = Vec::new();
    for marker in PAYWALL_MARKERS {
        if let Some(pos) = text.find(marker) {
            hits.push((pos, marker));
        }
    }

    if has_password_field && !hits.is_empty() {
        return true;
    }

    hits.sort_unstable();
    hits.windows(2)
        .any(|pair| pair[1].0 - pair[0].0 <= PAYWALL_PROXIMITY)
}
