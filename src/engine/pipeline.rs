//! Per-URL pipeline: guard → scope → robots → skip/fetch → fallback →
//! index row → link enqueue.
//!
//! Exactly one index row is emitted for every finalised attempt. A worker
//! holds a fetcher semaphore only across the fetch itself; link handling
//! happens after release.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::canon;
use crate::fetch::{
    decode::decode_body, guard, links, FallbackPolicy, FetchOutcome, FetchRequest, FetchStatus,
    FetcherKind,
};
use crate::index::IndexRecord;

use super::{QueueItem, Shared, TaskOutcome};

pub(crate) async fn process_url(shared: Arc<Shared>, item: QueueItem) -> TaskOutcome {
    debug!(url = %item.url, depth = item.depth, "processing");

    // SSRF guard runs before any connection, including for links that were
    // admitted to the queue earlier.
    if let Err(err) = guard::check_url(&item.url, shared.config.allow_loopback()).await {
        return finalize(
            &shared,
            &item,
            FetchOutcome::failure(FetchStatus::FailedSsrf, None, err.to_string()),
        )
        .await;
    }

    // Authority scope. Enqueue already filters; a mismatch here means the
    // start URL itself was mis-scoped, which cannot happen, but stay safe.
    if canon::authority(&item.url) != shared.start_authority {
        return TaskOutcome::Dropped;
    }

    if !shared.robots.is_allowed(&item.url).await {
        return finalize(
            &shared,
            &item,
            FetchOutcome::failure(
                FetchStatus::FailedRobots,
                None,
                "disallowed by robots.txt",
            ),
        )
        .await;
    }

    // No-clobber skip path: an existing body for this canonical URL short-
    // circuits the fetch, but still feeds link discovery so depth accounting
    // stays consistent. An unreadable or undecodable cached body refetches.
    if !shared.config.force() {
        if let Some(existing) = shared.mapper.find_existing(&item.url) {
            if let Some(outcome) = skip_with_cached(&shared, &item, &existing).await {
                return finalize(&shared, &item, outcome).await;
            }
            debug!(url = %item.url, "cached body unusable, refetching");
        }
    }

    let Some(outcome) = fetch_with_fallback(&shared, &item).await else {
        return TaskOutcome::Cancelled;
    };
    finalize(&shared, &item, outcome).await
}

/// Build the `skipped` outcome from a previously saved body, or `None` when
/// the cached file is unusable and a refetch is warranted.
async fn skip_with_cached(
    shared: &Shared,
    item: &QueueItem,
    existing: &std::path::Path,
) -> Option<FetchOutcome> {
    let bytes = match tokio::fs::read(existing).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %existing.display(), %err, "failed to read cached body");
            return None;
        }
    };

    let hash = crate::fetch::content_hash(&bytes);
    let is_html = existing
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"));
    let detected_links = if is_html {
        let body = decode_body(&bytes, Some("text/html"));
        if body.trim().is_empty() {
            return None;
        }
        links::extract_links(&body, &item.url)
    } else {
        Vec::new()
    };

    Some(FetchOutcome {
        status: FetchStatus::Skipped,
        http_status: None,
        content_hash: Some(hash),
        // `local_path` is reserved for fresh saves; the skip row records
        // the hash of what is already on disk.
        local_path: None,
        body: None,
        detected_links,
        error_message: None,
    })
}

/// Politeness, semaphore, fetch, and the browser upgrade path. Returns
/// `None` when cancellation arrived before a fetch began (no row is
/// written; nothing was attempted).
async fn fetch_with_fallback(shared: &Shared, item: &QueueItem) -> Option<FetchOutcome> {
    let initial = shared.config.initial_fetcher();
    let mut outcome = fetch_one(shared, item, initial).await?;

    if initial == FetcherKind::Http && outcome.status == FetchStatus::Success {
        let upgrade = match shared.config.fallback() {
            FallbackPolicy::Never => false,
            FallbackPolicy::Always => true,
            FallbackPolicy::OnJsShell => shared.http.looks_like_js_shell(&outcome),
        };
        if upgrade {
            debug!(url = %item.url, "upgrading to browser render");
            match fetch_one(shared, item, FetcherKind::Browser).await? {
                upgraded if upgraded.status == FetchStatus::Success => outcome = upgraded,
                upgraded => {
                    warn!(
                        url = %item.url,
                        error = upgraded.error_message.as_deref().unwrap_or("unknown"),
                        "browser upgrade failed, keeping HTTP result"
                    );
                }
            }
        }
    }

    Some(outcome)
}

async fn fetch_one(
    shared: &Shared,
    item: &QueueItem,
    kind: FetcherKind,
) -> Option<FetchOutcome> {
    let request = FetchRequest {
        url: item.url.clone(),
        start_authority: shared.start_authority.clone(),
        mapper: shared.mapper.clone(),
        force: shared.config.force(),
        timeout: match kind {
            FetcherKind::Http => shared.config.timeout_http(),
            FetcherKind::Browser => shared.config.timeout_browser(),
        },
        max_body_size: shared.config.max_body_size(),
        max_redirects: shared.config.max_redirects(),
    };

    shared.politeness.wait_turn(&shared.start_authority).await;

    let semaphore = match kind {
        FetcherKind::Http => &shared.sem_http,
        FetcherKind::Browser => &shared.sem_browser,
    };
    let permit = tokio::select! {
        permit = semaphore.acquire() => permit.ok()?,
        _ = shared.cancel.cancelled() => return None,
    };

    // The fetch itself is never raced against cancellation: dropping it
    // mid-flight can leave its blocking save to finish in the background,
    // stranding a content file no index row accounts for. An attempt that
    // has started runs to completion (bounded by the per-attempt timeout)
    // and emits its row like any other.
    let outcome = match kind {
        FetcherKind::Http => shared.http.fetch(&request).await,
        FetcherKind::Browser => shared.browser.fetch(&request).await,
    };
    // Released before any link parsing or enqueueing happens.
    drop(permit);

    Some(outcome)
}

/// Emit the single index row for this attempt, then discover links.
async fn finalize(shared: &Shared, item: &QueueItem, outcome: FetchOutcome) -> TaskOutcome {
    let record = IndexRecord {
        original_url: item.original.clone(),
        canonical_url: item.url.as_str().to_string(),
        local_path: outcome
            .local_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        content_hash: outcome.content_hash.clone(),
        fetch_status: outcome.status,
        http_status: outcome.http_status,
        error_message: outcome
            .error_message
            .as_deref()
            .map(IndexRecord::truncate_error),
    };
    if let Err(err) = shared.writer.append(&record).await {
        warn!(url = %item.url, %err, "failed to append index row");
    }

    if item.depth == 0 && item.url.as_str() == shared.config.start_url().as_str() {
        let ok = matches!(outcome.status, FetchStatus::Success | FetchStatus::Skipped);
        shared.start_ok.store(ok, Ordering::Release);
    }

    let expandable = matches!(outcome.status, FetchStatus::Success | FetchStatus::Skipped);
    if expandable && item.depth < shared.config.max_depth() {
        enqueue_links(shared, &outcome.detected_links, item.depth + 1).await;
    }

    TaskOutcome::Finalized(outcome.status)
}

/// Scope-filter, dedupe and enqueue discovered links. Insertion into the
/// visited set happens before the push, and only the inserting worker may
/// push, so a URL is enqueued at most once per job.
async fn enqueue_links(shared: &Shared, candidates: &[Url], depth: u32) {
    for url in candidates {
        if canon::authority(url) != shared.start_authority {
            // Off-authority links are dropped without an index row.
            continue;
        }
        if !shared.visited.insert(url.as_str().to_string()) {
            continue;
        }

        let permit = tokio::select! {
            permit = shared.queue_slots.acquire() => match permit {
                Ok(p) => p,
                Err(_) => return,
            },
            _ = shared.cancel.cancelled() => return,
        };
        permit.forget();

        shared.queue.lock().await.push_back(QueueItem {
            url: url.clone(),
            original: url.as_str().to_string(),
            depth,
        });
    }
}
