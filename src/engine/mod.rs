//! Crawl engine: bounded work queue, visited set, politeness, fetcher
//! fallback, link discovery and index emission.
//!
//! One engine run owns one job's content tree and index file. Worker tasks
//! pull `(canonical_url, depth)` items from a shared queue and drive each
//! through the pipeline in [`pipeline`]; the loop terminates when the queue
//! is empty and no task is in flight, and only then is the index closed and
//! the terminal job status decided.

pub mod politeness;

mod pipeline;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashSet;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::cancel::CancelToken;
use crate::canon::{self, PathMapper};
use crate::config::CrawlConfig;
use crate::fetch::browser::BrowserFetcher;
use crate::fetch::http::HttpFetcher;
use crate::fetch::FetchStatus;
use crate::index::IndexWriter;
use crate::layout::Workspace;
use crate::robots::RobotsPolicy;

use politeness::PolitenessGate;

/// One queued fetch attempt.
#[derive(Debug, Clone)]
pub(crate) struct QueueItem {
    pub url: Url,
    /// URL as originally supplied or discovered, before canonicalisation.
    pub original: String,
    pub depth: u32,
}

/// What a worker task reported back to the drain loop.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TaskOutcome {
    Finalized(FetchStatus),
    Cancelled,
    /// Off-scope or otherwise dropped without an index row.
    Dropped,
}

/// Aggregate result of a finished crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Whether the start URL itself finalised as saved or skipped; drives
    /// the job's terminal status.
    pub start_url_ok: bool,
}

impl CrawlSummary {
    pub fn completed(&self) -> bool {
        !self.cancelled && self.start_url_ok
    }
}

/// State shared by the drain loop and every worker task of one job.
pub(crate) struct Shared {
    pub config: CrawlConfig,
    pub start_authority: String,
    pub mapper: PathMapper,
    pub robots: RobotsPolicy,
    pub http: HttpFetcher,
    pub browser: BrowserFetcher,
    pub writer: IndexWriter,
    pub visited: DashSet<String>,
    pub queue: Mutex<VecDeque<QueueItem>>,
    /// Free capacity of the queue; push acquires, pop releases. Enqueue
    /// blocks when the crawl frontier outruns the workers.
    pub queue_slots: Semaphore,
    pub sem_http: Semaphore,
    pub sem_browser: Semaphore,
    pub politeness: PolitenessGate,
    pub cancel: CancelToken,
    pub start_ok: AtomicBool,
}

/// Crawl `config.start_url()` into the job's content tree and index.
pub async fn crawl(
    config: CrawlConfig,
    workspace: &Workspace,
    job_id: &str,
    cancel: CancelToken,
) -> Result<CrawlSummary> {
    workspace.prepare_job(job_id).await?;

    let start_url = config.start_url().clone();
    let start_authority = canon::authority(&start_url);
    let content_root = workspace.content_dir(job_id);

    let http = HttpFetcher::new(
        config.user_agent(),
        config.allow_loopback(),
        config.js_shell_max_body_len(),
        config.js_shell_max_text_nodes(),
    )?;
    let robots = RobotsPolicy::new(config.user_agent(), http.client());
    let writer = IndexWriter::create(workspace.index_path(job_id)).await?;

    let shared = Arc::new(Shared {
        start_authority,
        mapper: PathMapper::new(content_root),
        robots,
        http,
        browser: BrowserFetcher::new(),
        writer,
        visited: DashSet::new(),
        queue: Mutex::new(VecDeque::new()),
        queue_slots: Semaphore::new(config.max_queue()),
        sem_http: Semaphore::new(config.max_concurrent_http()),
        sem_browser: Semaphore::new(config.max_concurrent_browser()),
        politeness: PolitenessGate::new(config.politeness_delay()),
        cancel,
        start_ok: AtomicBool::new(false),
        config,
    });

    // The start URL is admitted like any other: visited before enqueued.
    shared.visited.insert(start_url.as_str().to_string());
    {
        let permit = shared
            .queue_slots
            .try_acquire()
            .context("queue capacity must be positive")?;
        permit.forget();
        shared.queue.lock().await.push_back(QueueItem {
            original: start_url.as_str().to_string(),
            url: start_url,
            depth: 0,
        });
    }

    let summary = drain(&shared).await;

    shared
        .writer
        .close()
        .await
        .context("failed to close index writer")?;
    shared.browser.shutdown().await;

    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "crawl finished"
    );
    Ok(summary)
}

/// Run worker tasks until the queue is empty and nothing is in flight.
async fn drain(shared: &Arc<Shared>) -> CrawlSummary {
    let worker_cap = shared
        .config
        .max_concurrent_http()
        .max(shared.config.max_concurrent_browser());

    let mut active = FuturesUnordered::new();
    let mut summary = CrawlSummary::default();

    loop {
        while active.len() < worker_cap && !shared.cancel.is_cancelled() {
            let item = { shared.queue.lock().await.pop_front() };
            let Some(item) = item else {
                break;
            };
            shared.queue_slots.add_permits(1);

            let task_shared = Arc::clone(shared);
            active.push(tokio::spawn(async move {
                pipeline::process_url(task_shared, item).await
            }));
        }

        if active.is_empty() {
            let queue_empty = shared.queue.lock().await.is_empty();
            if queue_empty || shared.cancel.is_cancelled() {
                break;
            }
            continue;
        }

        match active.next().await {
            Some(Ok(outcome)) => tally(&mut summary, outcome),
            Some(Err(err)) => warn!(%err, "crawl task panicked"),
            None => {}
        }
    }

    summary.cancelled = shared.cancel.is_cancelled();
    summary.start_url_ok = shared.start_ok.load(Ordering::Acquire);
    debug!(?summary, "crawl loop drained");
    summary
}

fn tally(summary: &mut CrawlSummary, outcome: TaskOutcome) {
    match outcome {
        TaskOutcome::Finalized(status) => {
            summary.attempted += 1;
            match status {
                FetchStatus::Success => summary.succeeded += 1,
                FetchStatus::Skipped => summary.skipped += 1,
                _ => summary.failed += 1,
            }
        }
        TaskOutcome::Cancelled | TaskOutcome::Dropped => {}
    }
}
