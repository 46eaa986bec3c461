//! Append-only, line-delimited JSON index: one record per URL attempt.
//!
//! Records are written when an attempt is finalised, never when it is
//! enqueued, so file order is finalisation order. Writers within a process
//! are serialised by a per-file mutex; the file is fsynced once at job end.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use crate::fetch::FetchStatus;

/// Longest `error_message` carried by a record, in bytes.
const MAX_ERROR_LEN: usize = 2000;

/// One fetch attempt, as persisted in `<root>/index/<job_id>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub original_url: String,
    pub canonical_url: String,
    /// Empty unless the attempt saved a body (`fetch_status = success`).
    #[serde(default)]
    pub local_path: String,
    /// MD5 of the saved (or, for skips, previously saved) bytes.
    #[serde(default)]
    pub content_hash: Option<String>,
    pub fetch_status: FetchStatus,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl IndexRecord {
    /// Truncate an error to the persisted cap, respecting char boundaries.
    pub fn truncate_error(message: impl Into<String>) -> String {
        let mut message = message.into();
        if message.len() > MAX_ERROR_LEN {
            let mut end = MAX_ERROR_LEN;
            while end > 0 && !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        message
    }
}

/// Serialised writer for one job's index file.
#[derive(Debug)]
pub struct IndexWriter {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl IndexWriter {
    /// Open (truncating any stale file from a reused id) for appending.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open index {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one finalised record as a single LF-terminated JSON line.
    pub async fn append(&self, record: &IndexRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("failed to serialise index record")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Flush and fsync. Called once, after the fetch loop drains.
    pub async fn close(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await.context("failed to flush index")?;
        file.sync_all()
            .await
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        Ok(())
    }
}

/// Read a job index. Blank lines are tolerated; unknown keys are ignored;
/// a malformed line is logged and skipped rather than failing the read.
pub async fn read_index(path: &Path) -> Result<Vec<IndexRecord>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open index {}", path.display()))?;

    let mut records = Vec::new();
    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(index = %path.display(), %err, "skipping malformed index line"),
        }
    }
    Ok(records)
}
