//! On-disk workspace layout shared by crawl jobs and the search pipeline.
//!
//! Every job owns two locations under the workspace root:
//!
//! ```text
//! <root>/content/<job_id>/<authority>/<slug>-<hash>.<ext>
//! <root>/index/<job_id>.jsonl
//! ```
//!
//! Job ids never collide (the job manager rejects duplicates), so ownership
//! of these paths is exclusive for the lifetime of the job.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Root directory handle for all persisted state.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content root owned by a single job.
    pub fn content_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("content").join(job_id)
    }

    /// Line-delimited JSON index file owned by a single job.
    pub fn index_path(&self, job_id: &str) -> PathBuf {
        self.root.join("index").join(format!("{job_id}.jsonl"))
    }

    /// Scratch directory for temporary checkouts and staging files.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the directories a job writes into.
    pub async fn prepare_job(&self, job_id: &str) -> Result<()> {
        let content = self.content_dir(job_id);
        tokio::fs::create_dir_all(&content)
            .await
            .with_context(|| format!("failed to create content dir {}", content.display()))?;

        let index = self.index_path(job_id);
        if let Some(parent) = index.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create index dir {}", parent.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_paths_are_disjoint_per_id() {
        let ws = Workspace::new("/data");
        assert_eq!(
            ws.index_path("job-a"),
            PathBuf::from("/data/index/job-a.jsonl")
        );
        assert_ne!(ws.content_dir("job-a"), ws.content_dir("job-b"));
    }
}
