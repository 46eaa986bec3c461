//! Job admission, lifecycle and status.
//!
//! The manager owns every job record for the life of the process (durability
//! across restarts is a non-goal). Admission sanitises the id, rejects
//! duplicates, creates the record in `pending` and spawns a background
//! worker that runs the crawl engine or the repository acquirer and writes
//! exactly one terminal transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cancel::CancelToken;
use crate::config::CrawlConfig;
use crate::engine::{self, CrawlSummary};
use crate::fetch::FetcherKind;
use crate::layout::Workspace;
use crate::repo;

/// Longest `error_detail` kept on a job record, in bytes.
const MAX_ERROR_DETAIL: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Web,
    Browser,
    Repo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// Transport-agnostic submission descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub id: Option<String>,
    /// Per-attempt HTTP timeout in seconds.
    #[serde(default)]
    pub timeout_http: Option<u64>,
    /// Per-attempt browser timeout in seconds.
    #[serde(default)]
    pub timeout_browser: Option<u64>,
    #[serde(default)]
    pub max_body_size: Option<usize>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub doc_subpath: Option<String>,
}

/// Admission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub status: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("invalid job request: {0}")]
    Invalid(String),
    #[error("job id {0:?} already exists")]
    Duplicate(String),
}

#[derive(Debug)]
struct JobEntry {
    snapshot: Mutex<JobSnapshot>,
    cancel: CancelToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide registry and runner of jobs.
#[derive(Debug)]
pub struct JobManager {
    workspace: Workspace,
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl JobManager {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            jobs: DashMap::new(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Admit a job from a transport-level request.
    pub fn submit(&self, request: JobRequest) -> Result<JobAccepted, AdmitError> {
        match request.kind {
            JobKind::Web | JobKind::Browser => {
                let url = request
                    .url
                    .clone()
                    .ok_or_else(|| AdmitError::Invalid("url is required".into()))?;

                let mut builder = CrawlConfig::builder()
                    .start_url(url)
                    .max_depth(request.depth)
                    .force(request.force)
                    .initial_fetcher(match request.kind {
                        JobKind::Browser => FetcherKind::Browser,
                        _ => FetcherKind::Http,
                    });
                if let Some(secs) = request.timeout_http {
                    builder = builder.timeout_http(std::time::Duration::from_secs(secs));
                }
                if let Some(secs) = request.timeout_browser {
                    builder = builder.timeout_browser(std::time::Duration::from_secs(secs));
                }
                if let Some(bytes) = request.max_body_size {
                    builder = builder.max_body_size(bytes);
                }
                let config = builder
                    .build()
                    .map_err(|e| AdmitError::Invalid(e.to_string()))?;

                self.submit_crawl(request.id, request.kind, config)
            }
            JobKind::Repo => {
                let repo_url = request
                    .repo_url
                    .clone()
                    .ok_or_else(|| AdmitError::Invalid("repo_url is required".into()))?;
                let doc_subpath = request.doc_subpath.clone().unwrap_or_default();
                self.submit_repo(request.id, repo_url, doc_subpath)
            }
        }
    }

    /// Admit a crawl job with a fully built configuration.
    pub fn submit_crawl(
        &self,
        id: Option<String>,
        kind: JobKind,
        config: CrawlConfig,
    ) -> Result<JobAccepted, AdmitError> {
        let workspace = self.workspace.clone();
        self.admit(id, kind, move |job_id, cancel| async move {
            engine::crawl(config, &workspace, &job_id, cancel).await
        })
    }

    /// Admit a repository acquisition job.
    pub fn submit_repo(
        &self,
        id: Option<String>,
        repo_url: String,
        doc_subpath: String,
    ) -> Result<JobAccepted, AdmitError> {
        let workspace = self.workspace.clone();
        self.admit(id, JobKind::Repo, move |job_id, cancel| async move {
            repo::acquire(&workspace, &job_id, &repo_url, &doc_subpath, &cancel).await
        })
    }

    fn admit<F, Fut>(
        &self,
        id: Option<String>,
        kind: JobKind,
        work: F,
    ) -> Result<JobAccepted, AdmitError>
    where
        F: FnOnce(String, CancelToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<CrawlSummary>> + Send + 'static,
    {
        let job_id = match id {
            Some(raw) => sanitize_id(&raw)
                .ok_or_else(|| AdmitError::Invalid(format!("unusable job id {raw:?}")))?,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let entry = Arc::new(JobEntry {
            snapshot: Mutex::new(JobSnapshot {
                id: job_id.clone(),
                kind,
                status: JobStatus::Pending,
                start_time: None,
                end_time: None,
                message: None,
                error_detail: None,
            }),
            cancel: CancelToken::new(),
            handle: std::sync::Mutex::new(None),
        });

        // Insert-or-reject atomically; two submitters cannot share an id.
        match self.jobs.entry(job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AdmitError::Duplicate(job_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }

        info!(id = %job_id, ?kind, "job admitted");

        let worker_entry = Arc::clone(&entry);
        let worker_id = job_id.clone();
        let cancel = entry.cancel.clone();
        let handle = tokio::spawn(async move {
            run_worker(worker_entry, worker_id, cancel, work).await;
        });
        *entry
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        Ok(JobAccepted {
            status: "accepted".to_string(),
            id: job_id,
            message: "job admitted".to_string(),
        })
    }

    /// Snapshot of a job's current state.
    pub async fn status(&self, id: &str) -> Option<JobSnapshot> {
        let entry = {
            let guard = self.jobs.get(id)?;
            Arc::clone(&guard)
        };
        let snapshot = entry.snapshot.lock().await.clone();
        Some(snapshot)
    }

    /// Request cancellation. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until a job reaches a terminal status, returning the final
    /// snapshot. Unknown ids return `None`.
    pub async fn wait(&self, id: &str) -> Option<JobSnapshot> {
        let entry = {
            let guard = self.jobs.get(id)?;
            Arc::clone(&guard)
        };
        let handle = entry
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.status(id).await
    }
}

async fn run_worker<F, Fut>(entry: Arc<JobEntry>, job_id: String, cancel: CancelToken, work: F)
where
    F: FnOnce(String, CancelToken) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<CrawlSummary>>,
{
    {
        let mut snapshot = entry.snapshot.lock().await;
        snapshot.status = JobStatus::Running;
        snapshot.start_time = Some(Utc::now());
    }

    let result = work(job_id.clone(), cancel).await;

    let mut snapshot = entry.snapshot.lock().await;
    snapshot.end_time = Some(Utc::now());
    match result {
        Ok(summary) if summary.cancelled => {
            snapshot.status = JobStatus::Failed;
            snapshot.message = Some("cancelled".to_string());
        }
        Ok(summary) if summary.completed() => {
            snapshot.status = JobStatus::Completed;
            snapshot.message = Some(format!(
                "{} URLs attempted, {} saved, {} skipped, {} failed",
                summary.attempted, summary.succeeded, summary.skipped, summary.failed
            ));
        }
        Ok(summary) => {
            snapshot.status = JobStatus::Failed;
            snapshot.message = Some("start URL failed".to_string());
            snapshot.error_detail = Some(format!(
                "{} URLs attempted, {} failed",
                summary.attempted, summary.failed
            ));
        }
        Err(err) => {
            error!(id = %job_id, error = %format!("{err:#}"), "job worker failed");
            snapshot.status = JobStatus::Failed;
            snapshot.message = Some("job failed".to_string());
            snapshot.error_detail = Some(truncate(format!("{err:#}")));
        }
    }
}

/// Restrict an id to `[A-Za-z0-9_.\-]`; anything else becomes `_`. Empty
/// input is unusable.
fn sanitize_id(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    )
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_ERROR_DETAIL {
        let mut end = MAX_ERROR_DETAIL;
        while end > 0 && !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
