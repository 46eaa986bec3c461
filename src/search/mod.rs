//! Two-phase search over a crawl job's archive.
//!
//! Phase one ([`scanner`]) narrows the job's successfully fetched files with
//! a keyword scan; phase two ([`extractor`]) pulls structured fragments with
//! a CSS selector. Results join back to originating URLs through the job
//! index and are ordered stably: index order of the file, then document
//! order of the match.

pub mod extractor;
pub mod scanner;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::{decode::decode_body, FetchStatus};
use crate::index;
use crate::layout::Workspace;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("job {0:?} not found")]
    JobNotFound(String),
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("failed to read job index: {0}")]
    Index(#[source] anyhow::Error),
}

/// A search request scoped to one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub job_id: String,
    #[serde(default)]
    pub scan_keywords: Vec<String>,
    pub selector: String,
    #[serde(default)]
    pub extract_keywords: Vec<String>,
}

/// One extracted fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub original_url: String,
    pub extracted_text: String,
    pub selector_matched: String,
}

/// Run a search against a job's index and content tree.
pub async fn run_search(
    workspace: &Workspace,
    request: &SearchRequest,
) -> Result<Vec<SearchHit>, SearchError> {
    // Reject malformed selectors before touching any file.
    extractor::validate_selector(&request.selector)?;

    let index_path = workspace.index_path(&request.job_id);
    if !index_path.is_file() {
        return Err(SearchError::JobNotFound(request.job_id.clone()));
    }

    let records = index::read_index(&index_path)
        .await
        .map_err(SearchError::Index)?;

    // Only successful fetches carry content; skips and failures have none.
    let successes: Vec<(PathBuf, String)> = records
        .into_iter()
        .filter(|r| r.fetch_status == FetchStatus::Success && !r.local_path.is_empty())
        .map(|r| (PathBuf::from(r.local_path), r.original_url))
        .collect();

    let paths: Vec<PathBuf> = successes.iter().map(|(path, _)| path.clone()).collect();
    let candidates = scanner::scan(
        paths,
        &request.scan_keywords,
        scanner::DEFAULT_SCAN_PARALLELISM,
    )
    .await;
    debug!(
        job = %request.job_id,
        total = successes.len(),
        candidates = candidates.len(),
        "scan phase complete"
    );

    let mut hits = Vec::new();
    for candidate in candidates {
        let Some((_, original_url)) = successes.iter().find(|(path, _)| *path == candidate)
        else {
            continue;
        };

        let bytes = match tokio::fs::read(&candidate).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %candidate.display(), %err, "skipping unreadable candidate");
                continue;
            }
        };
        let html = decode_body(&bytes, None);

        let texts = extractor::extract(&html, &request.selector, &request.extract_keywords)?;
        hits.extend(texts.into_iter().map(|extracted_text| SearchHit {
            original_url: original_url.clone(),
            extracted_text,
            selector_matched: request.selector.clone(),
        }));
    }

    Ok(hits)
}
