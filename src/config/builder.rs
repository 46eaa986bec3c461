//! Builder for [`CrawlConfig`] with validation.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::canon;
use crate::fetch::{FallbackPolicy, FetcherKind};

use super::{
    CrawlConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_POLITENESS_DELAY, DEFAULT_TIMEOUT_BROWSER,
    DEFAULT_TIMEOUT_HTTP, MAX_BROWSER_CONCURRENCY,
};

#[derive(Debug, Clone)]
pub struct CrawlConfigBuilder {
    start_url: Option<String>,
    max_depth: u32,
    force: bool,
    initial_fetcher: FetcherKind,
    fallback: FallbackPolicy,
    user_agent: String,
    timeout_http: Duration,
    timeout_browser: Duration,
    max_body_size: usize,
    politeness_delay: Duration,
    max_concurrent_http: usize,
    max_concurrent_browser: usize,
    max_queue: usize,
    max_redirects: u32,
    allow_loopback: bool,
    js_shell_max_body_len: usize,
    js_shell_max_text_nodes: usize,
}

impl Default for CrawlConfigBuilder {
    fn default() -> Self {
        Self {
            start_url: None,
            max_depth: 2,
            force: false,
            initial_fetcher: FetcherKind::Http,
            fallback: FallbackPolicy::OnJsShell,
            user_agent: format!("docharvest/{}", env!("CARGO_PKG_VERSION")),
            timeout_http: DEFAULT_TIMEOUT_HTTP,
            timeout_browser: DEFAULT_TIMEOUT_BROWSER,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            politeness_delay: DEFAULT_POLITENESS_DELAY,
            max_concurrent_http: 10,
            max_concurrent_browser: 2,
            max_queue: 10_000,
            max_redirects: 10,
            allow_loopback: false,
            js_shell_max_body_len: crate::fetch::heuristics::JS_SHELL_MAX_BODY_LEN,
            js_shell_max_text_nodes: crate::fetch::heuristics::JS_SHELL_MAX_TEXT_NODES,
        }
    }
}

impl CrawlConfigBuilder {
    pub fn start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn initial_fetcher(mut self, kind: FetcherKind) -> Self {
        self.initial_fetcher = kind;
        self
    }

    pub fn fallback(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = policy;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout_http(mut self, timeout: Duration) -> Self {
        self.timeout_http = timeout;
        self
    }

    pub fn timeout_browser(mut self, timeout: Duration) -> Self {
        self.timeout_browser = timeout;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    pub fn max_concurrent_http(mut self, n: usize) -> Self {
        self.max_concurrent_http = n;
        self
    }

    pub fn max_concurrent_browser(mut self, n: usize) -> Self {
        self.max_concurrent_browser = n;
        self
    }

    pub fn max_queue(mut self, n: usize) -> Self {
        self.max_queue = n;
        self
    }

    pub fn max_redirects(mut self, n: u32) -> Self {
        self.max_redirects = n;
        self
    }

    /// Permit loopback targets (locally served docs, tests). Private and
    /// link-local ranges remain blocked regardless.
    pub fn allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    pub fn js_shell_max_body_len(mut self, len: usize) -> Self {
        self.js_shell_max_body_len = len;
        self
    }

    pub fn js_shell_max_text_nodes(mut self, n: usize) -> Self {
        self.js_shell_max_text_nodes = n;
        self
    }

    pub fn build(self) -> Result<CrawlConfig> {
        let raw = self
            .start_url
            .ok_or_else(|| anyhow!("start_url is required"))?;
        let start_url = canon::canonicalize(&raw).context("invalid start URL")?;

        if self.max_body_size == 0 {
            return Err(anyhow!("max_body_size must be positive"));
        }

        Ok(CrawlConfig {
            start_url,
            max_depth: self.max_depth,
            force: self.force,
            initial_fetcher: self.initial_fetcher,
            fallback: self.fallback,
            user_agent: self.user_agent,
            timeout_http: self.timeout_http,
            timeout_browser: self.timeout_browser,
            max_body_size: self.max_body_size,
            politeness_delay: self.politeness_delay,
            max_concurrent_http: self.max_concurrent_http.max(1),
            max_concurrent_browser: self
                .max_concurrent_browser
                .clamp(1, MAX_BROWSER_CONCURRENCY),
            max_queue: self.max_queue.max(1),
            max_redirects: self.max_redirects,
            allow_loopback: self.allow_loopback,
            js_shell_max_body_len: self.js_shell_max_body_len,
            js_shell_max_text_nodes: self.js_shell_max_text_nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_url_is_canonicalised() {
        let config = CrawlConfig::builder()
            .start_url("HTTP://Example.COM:80/Docs#frag")
            .build()
            .unwrap();
        assert_eq!(config.start_url().as_str(), "http://example.com/Docs");
    }

    #[test]
    fn missing_start_url_is_rejected() {
        assert!(CrawlConfig::builder().build().is_err());
    }

    #[test]
    fn browser_concurrency_is_clamped_to_ceiling() {
        let config = CrawlConfig::builder()
            .start_url("http://example.com/")
            .max_concurrent_browser(64)
            .build()
            .unwrap();
        assert_eq!(config.max_concurrent_browser(), MAX_BROWSER_CONCURRENCY);
    }

    #[test]
    fn non_http_start_url_is_rejected() {
        assert!(CrawlConfig::builder()
            .start_url("ftp://example.com/docs")
            .build()
            .is_err());
    }
}
