//! Search coordinator tests: crawl a small site, then run two-phase
//! searches against the job's index.

mod common;

use docharvest::{engine, read_index, run_search, CancelToken, SearchError, SearchRequest};

use common::{page, page_with_links, test_config, test_workspace};

fn request(job: &str, scan: &[&str], selector: &str, extract: &[&str]) -> SearchRequest {
    SearchRequest {
        job_id: job.to_string(),
        scan_keywords: scan.iter().map(ToString::to_string).collect(),
        selector: selector.to_string(),
        extract_keywords: extract.iter().map(ToString::to_string).collect(),
    }
}

#[tokio::test]
async fn title_extraction_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("T", "<p>hello world</p>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    let config = test_config(&format!("{}/a", server.url()), 0);
    engine::crawl(config, &workspace, "s1", CancelToken::new())
        .await
        .unwrap();

    // S1: scan narrows on "hello", the selector pulls the title text.
    let hits = run_search(&workspace, &request("s1", &["hello"], "title", &[]))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].extracted_text, "T");
    assert_eq!(hits[0].selector_matched, "title");
    assert!(hits[0].original_url.ends_with("/a"));
}

#[tokio::test]
async fn wildcard_selector_with_empty_keywords_covers_every_success() {
    let mut server = mockito::Server::new_async().await;
    let hrefs: Vec<String> = (0..4).map(|i| format!("/doc/{i}")).collect();
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page_with_links("Hub", &hrefs))
        .create_async()
        .await;
    let mut mocks = Vec::new();
    for i in 0..4 {
        mocks.push(
            server
                .mock("GET", format!("/doc/{i}").as_str())
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body(page(&format!("Doc {i}"), &format!("<p>body {i}</p>")))
                .create_async()
                .await,
        );
    }

    let (_dir, workspace) = test_workspace();
    let config = test_config(&server.url(), 1);
    engine::crawl(config, &workspace, "p6", CancelToken::new())
        .await
        .unwrap();

    let successes = read_index(&workspace.index_path("p6"))
        .await
        .unwrap()
        .len();
    assert_eq!(successes, 5);

    // P6: empty keyword lists and a `*` selector reach all five files.
    let hits = run_search(&workspace, &request("p6", &[], "*", &[]))
        .await
        .unwrap();
    let mut urls: Vec<&str> = hits.iter().map(|h| h.original_url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    assert_eq!(urls.len(), 5, "text from every success file");
}

#[tokio::test]
async fn scan_keywords_are_a_conjunction_over_pages() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page_with_links(
            "Hub",
            &["/tokio".to_string(), "/serde".to_string()],
        ))
        .create_async()
        .await;
    let _m = server
        .mock("GET", "/tokio")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Tokio", "<h2>async runtime for rust</h2>"))
        .create_async()
        .await;
    let _m = server
        .mock("GET", "/serde")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("Serde", "<h2>serialization framework for rust</h2>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    engine::crawl(
        test_config(&server.url(), 1),
        &workspace,
        "scan",
        CancelToken::new(),
    )
    .await
    .unwrap();

    let hits = run_search(
        &workspace,
        &request("scan", &["rust", "runtime"], "h2", &[]),
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].extracted_text, "async runtime for rust");
}

#[tokio::test]
async fn extract_keywords_filter_fragments() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page(
            "Sections",
            "<h2>Install guide</h2><h2>Upgrade guide</h2><h2>FAQ</h2>",
        ))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    engine::crawl(
        test_config(&format!("{}/a", server.url()), 0),
        &workspace,
        "frag",
        CancelToken::new(),
    )
    .await
    .unwrap();

    let hits = run_search(&workspace, &request("frag", &[], "h2", &["guide"]))
        .await
        .unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.extracted_text.as_str()).collect();
    assert_eq!(texts, vec!["Install guide", "Upgrade guide"]);
}

#[tokio::test]
async fn malformed_selector_is_a_client_error_and_leaves_index_alone() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page("T", "<p>x</p>"))
        .create_async()
        .await;

    let (_dir, workspace) = test_workspace();
    engine::crawl(
        test_config(&format!("{}/a", server.url()), 0),
        &workspace,
        "s5",
        CancelToken::new(),
    )
    .await
    .unwrap();

    let index_path = workspace.index_path("s5");
    let before = std::fs::read(&index_path).unwrap();

    let err = run_search(&workspace, &request("s5", &[], "h2[[", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidSelector { .. }));

    // S5: the job index is untouched by a failed search.
    let after = std::fs::read(&index_path).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (_dir, workspace) = test_workspace();
    let err = run_search(&workspace, &request("nope", &["x"], "p", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::JobNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn failed_fetches_are_invisible_to_search() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page_with_links("Hub", &["/dead".to_string()]))
        .create_async()
        .await;
    let _m = server.mock("GET", "/dead").with_status(404).create_async().await;

    let (_dir, workspace) = test_workspace();
    engine::crawl(
        test_config(&server.url(), 1),
        &workspace,
        "mixed",
        CancelToken::new(),
    )
    .await
    .unwrap();

    let hits = run_search(&workspace, &request("mixed", &[], "title", &[]))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1, "only the successful page is searchable");
    assert_eq!(hits[0].extracted_text, "Hub");
}
