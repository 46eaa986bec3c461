//! Shared helpers for the docharvest integration tests.

use std::time::Duration;

use docharvest::{CrawlConfig, Workspace};
use tempfile::TempDir;

/// Workspace rooted in a fresh temporary directory.
#[allow(dead_code)]
pub fn test_workspace() -> (TempDir, Workspace) {
    let dir = TempDir::new().expect("tempdir");
    let workspace = Workspace::new(dir.path());
    (dir, workspace)
}

/// Crawl configuration tuned for tests: loopback allowed (mockito binds
/// 127.0.0.1) and politeness disabled for speed.
#[allow(dead_code)]
pub fn test_config(start_url: &str, depth: u32) -> CrawlConfig {
    CrawlConfig::builder()
        .start_url(start_url)
        .max_depth(depth)
        .allow_loopback(true)
        .politeness_delay(Duration::ZERO)
        .build()
        .expect("test config")
}

/// Minimal HTML page with a title and body markup.
#[allow(dead_code)]
pub fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>{body}</body></html>"
    )
}

/// A page whose body is a list of same-site links.
#[allow(dead_code)]
pub fn page_with_links(title: &str, hrefs: &[String]) -> String {
    let links: String = hrefs
        .iter()
        .map(|href| format!("<li><a href=\"{href}\">{href}</a></li>"))
        .collect();
    page(title, &format!("<ul>{links}</ul>"))
}

/// MD5 hex digest, for asserting `content_hash` against file bytes.
#[allow(dead_code)]
pub fn md5_hex(bytes: &[u8]) -> String {
    docharvest::fetch::content_hash(bytes)
}
