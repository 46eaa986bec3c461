//! Crawl configuration.
//!
//! A validated, immutable bundle of knobs for one crawl job. Construct via
//! [`CrawlConfig::builder`]; the builder normalises the start URL and clamps
//! resource limits to sane ranges.

mod builder;

pub use builder::CrawlConfigBuilder;

use std::time::Duration;

use url::Url;

use crate::fetch::{FallbackPolicy, FetcherKind};

/// Default per-attempt timeout for HTTP fetches.
pub const DEFAULT_TIMEOUT_HTTP: Duration = Duration::from_secs(30);
/// Default per-attempt timeout for browser renders.
pub const DEFAULT_TIMEOUT_BROWSER: Duration = Duration::from_secs(60);
/// Default body-size cap, applied while streaming.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
/// Default minimum gap between fetches against one authority.
pub const DEFAULT_POLITENESS_DELAY: Duration = Duration::from_millis(500);
/// Hard ceiling on concurrent browser pages.
pub const MAX_BROWSER_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub(crate) start_url: Url,
    pub(crate) max_depth: u32,
    pub(crate) force: bool,
    pub(crate) initial_fetcher: FetcherKind,
    pub(crate) fallback: FallbackPolicy,
    pub(crate) user_agent: String,
    pub(crate) timeout_http: Duration,
    pub(crate) timeout_browser: Duration,
    pub(crate) max_body_size: usize,
    pub(crate) politeness_delay: Duration,
    pub(crate) max_concurrent_http: usize,
    pub(crate) max_concurrent_browser: usize,
    pub(crate) max_queue: usize,
    pub(crate) max_redirects: u32,
    pub(crate) allow_loopback: bool,
    pub(crate) js_shell_max_body_len: usize,
    pub(crate) js_shell_max_text_nodes: usize,
}

impl CrawlConfig {
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::default()
    }

    /// Canonical start URL; its authority scopes the whole crawl.
    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn initial_fetcher(&self) -> FetcherKind {
        self.initial_fetcher
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn timeout_http(&self) -> Duration {
        self.timeout_http
    }

    pub fn timeout_browser(&self) -> Duration {
        self.timeout_browser
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    pub fn max_concurrent_http(&self) -> usize {
        self.max_concurrent_http
    }

    pub fn max_concurrent_browser(&self) -> usize {
        self.max_concurrent_browser
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn allow_loopback(&self) -> bool {
        self.allow_loopback
    }

    pub fn js_shell_max_body_len(&self) -> usize {
        self.js_shell_max_body_len
    }

    pub fn js_shell_max_text_nodes(&self) -> usize {
        self.js_shell_max_text_nodes
    }
}
