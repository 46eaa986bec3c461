//! Browser-render fetcher.
//!
//! Drives a headless Chromium instance over CDP. The browser is launched
//! lazily on the first render and shared by every render in the job; the
//! engine bounds concurrent pages with its browser semaphore. The serialised
//! `document.documentElement.outerHTML` is the body; link candidates come
//! from the live DOM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::canon;

use super::{
    content_hash, ensure_within_root, heuristics, FetchOutcome, FetchRequest, FetchStatus,
};

/// Collect candidate links from the live DOM: anchors plus frame/script
/// document-relative sources, resolved to absolute http(s) URLs.
const LINKS_SCRIPT: &str = r#"
(() => {
    const raw = [];
    document.querySelectorAll('a[href]').forEach((el) => raw.push(el.getAttribute('href')));
    document.querySelectorAll('frame[src], iframe[src]').forEach((el) => raw.push(el.getAttribute('src')));
    document.querySelectorAll('script[src]').forEach((el) => raw.push(el.getAttribute('src')));
    return raw
        .map((value) => {
            if (!value) return null;
            try {
                const url = new URL(value, document.baseURI);
                return ['http:', 'https:'].includes(url.protocol) ? url.href : null;
            } catch (_) {
                return null;
            }
        })
        .filter((value) => value !== null);
})()
"#;

struct BrowserHandle {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
}

#[derive(Default)]
pub struct BrowserFetcher {
    handle: Mutex<Option<BrowserHandle>>,
}

impl std::fmt::Debug for BrowserFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserFetcher").finish_non_exhaustive()
    }
}

impl BrowserFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one URL. Failures fold into the outcome like the HTTP fetcher;
    /// a navigation timeout is a `failed_request`.
    pub async fn fetch(&self, req: &FetchRequest) -> FetchOutcome {
        let browser = match self.ensure_launched().await {
            Ok(b) => b,
            Err(err) => {
                return FetchOutcome::failure(
                    FetchStatus::FailedOther,
                    None,
                    format!("browser unavailable: {err:#}"),
                );
            }
        };

        match tokio::time::timeout(req.timeout, render(browser, req)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::failure(
                FetchStatus::FailedRequest,
                None,
                format!("navigation timed out after {:?}", req.timeout),
            ),
        }
    }

    async fn ensure_launched(&self) -> Result<Arc<Browser>> {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(&handle.browser));
        }

        let config = browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;
        info!("headless browser launched");

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(%err, "browser handler event error");
                }
            }
        });

        let browser = Arc::new(browser);
        *slot = Some(BrowserHandle {
            browser: Arc::clone(&browser),
            handler_task,
        });
        Ok(browser)
    }

    /// Close the browser and stop its CDP handler. Called once per job after
    /// the crawl loop drains.
    pub async fn shutdown(&self) {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.take() {
            match Arc::try_unwrap(handle.browser) {
                Ok(mut browser) => {
                    if let Err(err) = browser.close().await {
                        warn!(%err, "failed to close browser");
                    }
                    let _ = browser.wait().await;
                }
                Err(_) => warn!("browser still referenced at shutdown, leaving to drop"),
            }
            handle.handler_task.abort();
        }
    }
}

fn browser_config() -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--mute-audio");
    if let Some(exe) = find_browser_executable() {
        builder = builder.chrome_executable(exe);
    }
    builder
        .build()
        .map_err(|e| anyhow!("invalid browser config: {e}"))
}

/// Locate a Chrome/Chromium binary: `CHROMIUM_PATH` wins, then well-known
/// install locations, then `which`.
fn find_browser_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points at nothing");
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }
    None
}

async fn render(browser: Arc<Browser>, req: &FetchRequest) -> FetchOutcome {
    let page = match browser.new_page("about:blank").await {
        Ok(p) => p,
        Err(err) => {
            return FetchOutcome::failure(
                FetchStatus::FailedOther,
                None,
                format!("failed to open page: {err}"),
            );
        }
    };

    let result = render_on_page(&page, req).await;
    if let Err(err) = page.close().await {
        debug!(%err, "failed to close page");
    }
    result
}

async fn render_on_page(page: &chromiumoxide::Page, req: &FetchRequest) -> FetchOutcome {
    if let Err(err) = page.goto(req.url.as_str()).await {
        return FetchOutcome::failure(
            FetchStatus::FailedRequest,
            None,
            format!("navigation failed: {err}"),
        );
    }
    if let Err(err) = page.wait_for_navigation().await {
        return FetchOutcome::failure(
            FetchStatus::FailedRequest,
            None,
            format!("document load failed: {err}"),
        );
    }

    // The page may have been redirected while loading; re-apply the
    // authority scope to the URL we actually ended up on.
    match evaluate_string(page, "window.location.href").await {
        Ok(final_url) => match canon::canonicalize(&final_url) {
            Ok(landed) if canon::authority(&landed) == req.start_authority => {}
            Ok(landed) => {
                return FetchOutcome::failure(
                    FetchStatus::FailedRequest,
                    None,
                    format!("redirect left authority: {landed}"),
                );
            }
            Err(err) => {
                return FetchOutcome::failure(
                    FetchStatus::FailedOther,
                    None,
                    format!("unparsable final location: {err}"),
                );
            }
        },
        Err(err) => {
            return FetchOutcome::failure(FetchStatus::FailedOther, None, err.to_string());
        }
    }

    let html = match evaluate_string(page, "document.documentElement.outerHTML").await {
        Ok(html) => html,
        Err(err) => {
            return FetchOutcome::failure(FetchStatus::FailedOther, None, err.to_string());
        }
    };

    if html.len() > req.max_body_size {
        return FetchOutcome::failure(
            FetchStatus::FailedToobig,
            Some(200),
            format!("rendered body exceeds cap of {} bytes", req.max_body_size),
        );
    }
    if heuristics::is_paywalled(&html) {
        return FetchOutcome::failure(
            FetchStatus::FailedPaywall,
            Some(200),
            "paywall or login wall detected",
        );
    }

    let detected_links = match page.evaluate(LINKS_SCRIPT).await {
        Ok(result) => match result.into_value::<Vec<String>>() {
            Ok(raw) => raw
                .iter()
                .filter_map(|candidate| canon::canonicalize(candidate).ok())
                .collect(),
            Err(err) => {
                debug!(%err, "link collection returned no array");
                Vec::new()
            }
        },
        Err(err) => {
            debug!(%err, "link collection script failed");
            Vec::new()
        }
    };

    let target = req.mapper.map(&req.url, Some("text/html"));
    if let Err(err) = ensure_within_root(&target, req.mapper.content_root()) {
        return FetchOutcome::failure(FetchStatus::FailedOther, Some(200), err.to_string());
    }

    let bytes = html.clone().into_bytes();
    let hash = content_hash(&bytes);
    if let Err(err) = super::save_atomic(&target, bytes).await {
        warn!(url = %req.url, %err, "failed to save rendered body");
        return FetchOutcome::failure(FetchStatus::FailedOther, Some(200), err.to_string());
    }

    FetchOutcome {
        status: FetchStatus::Success,
        http_status: Some(200),
        content_hash: Some(hash),
        local_path: Some(target),
        body: Some(html),
        detected_links,
        error_message: None,
    }
}

async fn evaluate_string(page: &chromiumoxide::Page, script: &str) -> Result<String> {
    let result = page
        .evaluate(script)
        .await
        .map_err(|e| anyhow!("script evaluation failed: {e}"))?;
    result
        .into_value::<String>()
        .map_err(|e| anyhow!("script returned no string: {e}"))
}
