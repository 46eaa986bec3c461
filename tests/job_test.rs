//! Job manager lifecycle tests: admission, duplicate rejection, status
//! transitions, concurrent job isolation and cancellation.

mod common;

use std::time::Duration;

use docharvest::{
    read_index, repo, CancelToken, CrawlConfig, JobKind, JobManager, JobRequest, JobStatus,
};

use common::{page, page_with_links, test_config, test_workspace};

#[tokio::test]
async fn crawl_job_reaches_completed_with_timestamps() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Home", "<p>docs</p>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace);

    let accepted = manager
        .submit_crawl(
            Some("lifecycle".to_string()),
            JobKind::Web,
            test_config(&server.url(), 0),
        )
        .unwrap();
    assert_eq!(accepted.status, "accepted");
    assert_eq!(accepted.id, "lifecycle");

    let snapshot = manager.wait("lifecycle").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.start_time.is_some());
    assert!(snapshot.end_time.is_some());
    assert!(snapshot.start_time <= snapshot.end_time);
    assert!(snapshot.message.is_some());
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Home", "<p>x</p>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace);

    manager
        .submit_crawl(
            Some("twin".to_string()),
            JobKind::Web,
            test_config(&server.url(), 0),
        )
        .unwrap();
    let err = manager
        .submit_crawl(
            Some("twin".to_string()),
            JobKind::Web,
            test_config(&server.url(), 0),
        )
        .unwrap_err();
    assert!(err.to_string().contains("twin"));

    manager.wait("twin").await;
}

#[tokio::test]
async fn ids_are_sanitised_on_admission() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Home", "<p>x</p>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace);

    let accepted = manager
        .submit_crawl(
            Some("docs v1/next".to_string()),
            JobKind::Web,
            test_config(&server.url(), 0),
        )
        .unwrap();
    assert_eq!(accepted.id, "docs_v1_next");
    manager.wait(&accepted.id).await;
}

#[tokio::test]
async fn request_admission_validates_fields() {
    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace);

    // Web job without a URL.
    let err = manager
        .submit(JobRequest {
            kind: JobKind::Web,
            url: None,
            depth: 0,
            force: false,
            id: None,
            timeout_http: None,
            timeout_browser: None,
            max_body_size: None,
            repo_url: None,
            doc_subpath: None,
        })
        .unwrap_err();
    assert!(err.to_string().contains("url"));

    // Repo job without a repository.
    let err = manager
        .submit(JobRequest {
            kind: JobKind::Repo,
            url: None,
            depth: 0,
            force: false,
            id: None,
            timeout_http: None,
            timeout_browser: None,
            max_body_size: None,
            repo_url: None,
            doc_subpath: None,
        })
        .unwrap_err();
    assert!(err.to_string().contains("repo_url"));
}

#[tokio::test]
async fn unknown_ids_have_no_status_and_cannot_cancel() {
    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace);
    assert!(manager.status("ghost").await.is_none());
    assert!(!manager.cancel("ghost"));
}

#[tokio::test]
async fn concurrent_jobs_keep_disjoint_archives() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page_with_links("Hub", &["/a".to_string(), "/b".to_string()]))
        .create_async()
        .await;
    let mut mocks = Vec::new();
    for path in ["/a", "/b"] {
        mocks.push(
            server
                .mock("GET", path)
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body(page(path, "<p>leaf</p>"))
                .create_async()
                .await,
        );
    }

    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace.clone());

    // S4: two jobs, same start URL, distinct ids, running concurrently.
    manager
        .submit_crawl(
            Some("job-a".to_string()),
            JobKind::Web,
            test_config(&server.url(), 1),
        )
        .unwrap();
    manager
        .submit_crawl(
            Some("job-b".to_string()),
            JobKind::Web,
            test_config(&server.url(), 1),
        )
        .unwrap();

    let a = manager.wait("job-a").await.unwrap();
    let b = manager.wait("job-b").await.unwrap();
    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);

    let index_a = read_index(&workspace.index_path("job-a")).await.unwrap();
    let index_b = read_index(&workspace.index_path("job-b")).await.unwrap();
    assert_eq!(index_a.len(), 3);
    assert_eq!(index_b.len(), 3);

    // No cross-writes: every saved path stays inside the owning job's tree.
    let root_a = workspace.content_dir("job-a");
    let root_b = workspace.content_dir("job-b");
    for record in &index_a {
        assert!(std::path::Path::new(&record.local_path).starts_with(&root_a));
    }
    for record in &index_b {
        assert!(std::path::Path::new(&record.local_path).starts_with(&root_b));
    }
}

#[tokio::test]
async fn cancellation_fails_the_job_and_leaves_a_clean_archive() {
    let mut server = mockito::Server::new_async().await;
    let hrefs: Vec<String> = (0..60).map(|i| format!("/slow/{i}")).collect();
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page_with_links("Hub", &hrefs))
        .create_async()
        .await;
    let mut mocks = Vec::new();
    for i in 0..60 {
        mocks.push(
            server
                .mock("GET", format!("/slow/{i}").as_str())
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body(page(&format!("S{i}"), "<p>slow</p>"))
                .create_async()
                .await,
        );
    }

    let (_dir, workspace) = test_workspace();
    let manager = JobManager::new(workspace.clone());

    // Politeness pacing keeps the crawl alive long enough to cancel it.
    let config = CrawlConfig::builder()
        .start_url(server.url())
        .max_depth(1)
        .allow_loopback(true)
        .politeness_delay(Duration::from_millis(25))
        .build()
        .unwrap();
    manager
        .submit_crawl(Some("cancelled".to_string()), JobKind::Web, config)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(manager.cancel("cancelled"));

    let snapshot = manager.wait("cancelled").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.message.as_deref(), Some("cancelled"));

    // Every line already in the index is well-formed (the reader would
    // reject partial rows), and no temp files linger in the content tree.
    let records = read_index(&workspace.index_path("cancelled")).await.unwrap();
    assert!(records.len() < 61, "crawl was cut short");

    // Every file on disk is owned by exactly one index row: a cancelled
    // attempt must not strand a saved body without its record.
    let recorded: std::collections::HashSet<&str> = records
        .iter()
        .filter(|r| !r.local_path.is_empty())
        .map(|r| r.local_path.as_str())
        .collect();
    let mut stack = vec![workspace.content_dir("cancelled")];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
                assert!(
                    name.ends_with(".html") || name.ends_with(".pdf") || name.ends_with(".bin"),
                    "unexpected file {name}"
                );
                let path_str = path.to_string_lossy();
                assert!(
                    recorded.contains(path_str.as_ref()),
                    "orphan content file with no index row: {path_str}"
                );
            }
        }
    }
}

#[tokio::test]
async fn repo_job_cancellation_interrupts_the_clone() {
    let (_dir, workspace) = test_workspace();

    // Cancelled before the clone starts: the acquirer must come back as
    // cancelled without touching git or copying anything.
    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = repo::acquire(
        &workspace,
        "repo-cancel",
        "file:///nowhere/docs.git",
        "docs",
        &cancel,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 0);
    assert!(!summary.completed());

    // The index exists (created before the clone) but holds no rows.
    let records = read_index(&workspace.index_path("repo-cancel")).await.unwrap();
    assert!(records.is_empty());
}
