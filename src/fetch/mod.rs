//! Fetchers: a lightweight HTTP implementation and a browser-render
//! implementation behind one request/outcome contract.
//!
//! The engine selects a variant explicitly through [`FetcherKind`]; there is
//! no runtime probing. Every attempt produces a [`FetchOutcome`] whose
//! [`FetchStatus`] maps one-to-one onto an index row.

pub mod browser;
pub mod decode;
pub mod guard;
pub mod heuristics;
pub mod http;
pub mod links;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::canon::PathMapper;

/// Which fetcher implementation handles a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherKind {
    Http,
    Browser,
}

/// When a successful HTTP fetch is upgraded to a browser render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    Never,
    #[default]
    OnJsShell,
    Always,
}

/// Terminal classification of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Skipped,
    FailedRequest,
    FailedRobots,
    FailedPaywall,
    FailedSsrf,
    FailedToobig,
    FailedOther,
}

impl FetchStatus {
    pub fn is_saved(self) -> bool {
        self == Self::Success
    }
}

/// One fetch attempt. The mapper doubles as the allowed base directory:
/// any path that would resolve outside its content root is an error before
/// a single byte is written.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Canonical URL being attempted; index rows and saved paths key on it.
    pub url: Url,
    /// Authority the whole crawl is scoped to.
    pub start_authority: String,
    pub mapper: PathMapper,
    pub force: bool,
    pub timeout: std::time::Duration,
    pub max_body_size: usize,
    pub max_redirects: u32,
}

/// Shared result record for both fetcher variants.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub content_hash: Option<String>,
    pub local_path: Option<PathBuf>,
    /// Decoded HTML body, present on success for HTML payloads. Feeds the
    /// JS-shell heuristic and cached-link reuse.
    pub body: Option<String>,
    pub detected_links: Vec<Url>,
    pub error_message: Option<String>,
}

impl FetchOutcome {
    pub fn failure(
        status: FetchStatus,
        http_status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            http_status,
            content_hash: None,
            local_path: None,
            body: None,
            detected_links: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// MD5 hex digest of saved bytes; the index's `content_hash`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Refuse target paths that escape the job's content root. The mapper never
/// produces one, but the contract demands the check before any write.
pub fn ensure_within_root(target: &Path, root: &Path) -> Result<()> {
    let normalized = normalize_lexically(target);
    let root = normalize_lexically(root);
    if normalized.starts_with(&root) {
        Ok(())
    } else {
        Err(anyhow!(
            "target {} escapes content root {}",
            target.display(),
            root.display()
        ))
    }
}

/// Resolve `.`/`..` components without touching the filesystem (the target
/// does not exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Write body bytes to `target` via a temporary sibling and atomic rename.
/// Files are never mutated in place.
pub async fn save_atomic(target: &Path, bytes: Vec<u8>) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| anyhow!("target {} has no parent", target.display()))?
        .to_path_buf();
    tokio::fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(&bytes).context("failed to write body")?;
        tmp.flush().context("failed to flush body")?;
        tmp.persist(&target)
            .map_err(|e| anyhow!("failed to persist {}: {}", target.display(), e.error))?;
        Ok(())
    })
    .await
    .context("atomic save task panicked")?
}
