//! Repository acquisition: shallow-clone a Git repository with the external
//! `git` client, copy its documentation subtree into the job's content root,
//! and emit one index row per copied file so repo jobs flow through the same
//! search pipeline as crawls.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::engine::CrawlSummary;
use crate::fetch::{content_hash, save_atomic, FetchStatus};
use crate::index::{IndexRecord, IndexWriter};
use crate::layout::Workspace;

/// Acquire `doc_subpath` of `repo_url` into the job's content tree.
pub async fn acquire(
    workspace: &Workspace,
    job_id: &str,
    repo_url: &str,
    doc_subpath: &str,
    cancel: &CancelToken,
) -> Result<CrawlSummary> {
    workspace.prepare_job(job_id).await?;
    tokio::fs::create_dir_all(workspace.tmp_dir())
        .await
        .context("failed to create scratch dir")?;

    let writer = IndexWriter::create(workspace.index_path(job_id)).await?;
    let checkout = tempfile::tempdir_in(workspace.tmp_dir())
        .context("failed to create checkout dir")?;

    let mut summary = CrawlSummary::default();

    if !clone_shallow(repo_url, checkout.path(), cancel).await? {
        summary.cancelled = true;
        writer.close().await?;
        info!(job = job_id, "repository acquisition cancelled during clone");
        return Ok(summary);
    }

    let docs_root = if doc_subpath.is_empty() {
        checkout.path().to_path_buf()
    } else {
        checkout.path().join(doc_subpath)
    };
    if !docs_root.is_dir() {
        bail!("doc subpath {doc_subpath:?} does not exist in {repo_url}");
    }

    let dest_root = workspace.content_dir(job_id).join("repo");

    for file in collect_files(&docs_root).await? {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let relative = file
            .strip_prefix(&docs_root)
            .map_err(|_| anyhow!("file {} escaped docs root", file.display()))?;
        let bytes = tokio::fs::read(&file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;

        let dest = dest_root.join(relative);
        let hash = content_hash(&bytes);
        save_atomic(&dest, bytes).await?;

        let original_url = format!(
            "{}/{}",
            repo_url.trim_end_matches('/'),
            relative.to_string_lossy().replace('\\', "/")
        );
        writer
            .append(&IndexRecord {
                original_url: original_url.clone(),
                canonical_url: original_url,
                local_path: dest.to_string_lossy().into_owned(),
                content_hash: Some(hash),
                fetch_status: FetchStatus::Success,
                http_status: None,
                error_message: None,
            })
            .await?;

        summary.attempted += 1;
        summary.succeeded += 1;
        debug!(file = %relative.display(), "copied doc file");
    }

    writer.close().await?;
    summary.start_url_ok = !summary.cancelled;

    info!(
        job = job_id,
        files = summary.succeeded,
        cancelled = summary.cancelled,
        "repository acquisition finished"
    );
    Ok(summary)
}

/// Shallow-clone `repo_url` into `target`. Returns `false` when the job was
/// cancelled before or during the clone; the child process is killed rather
/// than left running.
async fn clone_shallow(repo_url: &str, target: &Path, cancel: &CancelToken) -> Result<bool> {
    if cancel.is_cancelled() {
        return Ok(false);
    }

    let mut child = Command::new("git")
        .args(["clone", "--depth", "1", "--quiet", repo_url])
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to invoke git; is it installed?")?;

    // Drain stderr concurrently so a chatty clone cannot fill the pipe and
    // wedge `wait()`.
    let stderr_pipe = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr_pipe {
            use tokio::io::AsyncReadExt;
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.context("failed to wait for git clone")?
        }
        _ = cancel.cancelled() => {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill in-progress git clone");
            }
            stderr_task.abort();
            return Ok(false);
        }
    };

    if !status.success() {
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        bail!("git clone of {repo_url} failed: {}", stderr.trim());
    }
    Ok(true)
}

/// Walk a directory tree iteratively, returning files in a stable
/// (lexicographic per directory) order. `.git` metadata is ignored.
async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;
        while let Some(entry) = reader.next_entry().await? {
            entries.push(entry.path());
        }
        entries.sort();

        for path in entries.into_iter().rev() {
            if path.file_name().is_some_and(|name| name == ".git") {
                continue;
            }
            let metadata = tokio::fs::symlink_metadata(&path)
                .await
                .with_context(|| format!("failed to stat {}", path.display()))?;
            if metadata.is_dir() {
                stack.push(path);
            } else if metadata.is_file() {
                files.push(path);
            }
        }
    }

    // The stack walk emits files in reverse; normalise to a stable order.
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_files_walks_nested_dirs_and_skips_git() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("a/b")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join(".git")).await.unwrap();
        tokio::fs::write(dir.path().join("top.md"), "t").await.unwrap();
        tokio::fs::write(dir.path().join("a/one.md"), "1").await.unwrap();
        tokio::fs::write(dir.path().join("a/b/two.md"), "2").await.unwrap();
        tokio::fs::write(dir.path().join(".git/config"), "x").await.unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a/b/two.md", "a/one.md", "top.md"]);
    }
}
