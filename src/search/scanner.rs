//! First search phase: a fast keyword scan over decoded page content.
//!
//! Narrows the candidate set before the structural extractor does any HTML
//! parsing. Files are read up to a cap, decoded with the fetch layer's
//! charset sniffing, and matched as a lowercase substring conjunction. I/O
//! and decode problems skip the file rather than failing the search.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::fetch::decode::decode_body;

/// Files scanned concurrently.
pub const DEFAULT_SCAN_PARALLELISM: usize = 4;

/// Bytes read per file; anything beyond is not scanned.
pub const MAX_SCAN_BYTES: u64 = 5 * 1024 * 1024;

/// Return the paths whose decoded text contains *every* keyword,
/// case-insensitively, preserving input order.
///
/// An empty keyword list matches everything.
pub async fn scan(paths: Vec<PathBuf>, keywords: &[String], parallelism: usize) -> Vec<PathBuf> {
    if keywords.is_empty() {
        return paths;
    }

    let needles: Arc<Vec<String>> = Arc::new(
        keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect(),
    );
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));

    let mut tasks = Vec::with_capacity(paths.len());
    for (position, path) in paths.into_iter().enumerate() {
        let needles = Arc::clone(&needles);
        let semaphore = Arc::clone(&semaphore);
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let matched = matches_keywords(&path, &needles).await;
            (position, path, matched)
        }));
    }

    let mut matches = Vec::new();
    for task in tasks {
        match task.await {
            Ok((position, path, true)) => matches.push((position, path)),
            Ok((_, _, false)) => {}
            Err(err) => warn!(%err, "scan task panicked"),
        }
    }
    matches.sort_by_key(|(position, _)| *position);
    matches.into_iter().map(|(_, path)| path).collect()
}

async fn matches_keywords(path: &std::path::Path, needles: &[String]) -> bool {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(err) => {
            warn!(path = %path.display(), %err, "skipping unreadable file");
            return false;
        }
    };

    let mut bytes = Vec::new();
    if let Err(err) = file.take(MAX_SCAN_BYTES).read_to_end(&mut bytes).await {
        warn!(path = %path.display(), %err, "skipping file after read error");
        return false;
    }

    let haystack = decode_body(&bytes, None).to_lowercase();
    needles.iter().all(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn conjunction_of_keywords_must_all_match() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.html", "<p>Alpha beta gamma</p>").await;
        let b = write(dir.path(), "b.html", "<p>alpha only</p>").await;

        let hits = scan(
            vec![a.clone(), b],
            &["alpha".to_string(), "gamma".to_string()],
            DEFAULT_SCAN_PARALLELISM,
        )
        .await;
        assert_eq!(hits, vec![a]);
    }

    #[tokio::test]
    async fn matching_is_case_insensitive_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.html", "<p>Tokio RUNTIME</p>").await;

        let hits = scan(vec![a.clone()], &["Runtime".to_string()], 2).await;
        assert_eq!(hits, vec![a]);
    }

    #[tokio::test]
    async fn empty_keyword_list_matches_everything() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.html", "anything").await;
        let b = write(dir.path(), "b.html", "at all").await;

        let hits = scan(vec![a.clone(), b.clone()], &[], 2).await;
        assert_eq!(hits, vec![a, b]);
    }

    #[tokio::test]
    async fn missing_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.html", "needle").await;
        let ghost = dir.path().join("ghost.html");

        let hits = scan(vec![ghost, a.clone()], &["needle".to_string()], 2).await;
        assert_eq!(hits, vec![a]);
    }

    #[tokio::test]
    async fn input_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..8 {
            paths.push(write(dir.path(), &format!("f{i}.html"), "needle").await);
        }

        let hits = scan(paths.clone(), &["needle".to_string()], 3).await;
        assert_eq!(hits, paths);
    }
}
