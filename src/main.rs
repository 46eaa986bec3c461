mod cli;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use docharvest::{
    CrawlConfig, FetcherKind, JobKind, JobManager, JobSnapshot, JobStatus, SearchError,
    SearchRequest, Workspace,
};

use crate::cli::{Cli, Commands};

// Exit codes: 0 success, 2 invalid arguments (also clap's parse-error code),
// 3 job failed, 4 not found.
const EXIT_OK: u8 = 0;
const EXIT_INVALID: u8 = 2;
const EXIT_JOB_FAILED: u8 = 3;
const EXIT_NOT_FOUND: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            ExitCode::from(EXIT_JOB_FAILED)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let workspace = Workspace::new(cli.root);
    let manager = JobManager::new(workspace.clone());

    match cli.command {
        Commands::Crawl {
            url,
            depth,
            force,
            id,
            fallback,
            timeout_http,
            timeout_browser,
            max_body_size,
            politeness_ms,
            allow_loopback,
        } => {
            let mut builder = CrawlConfig::builder()
                .start_url(url)
                .max_depth(depth)
                .force(force)
                .fallback(fallback.into())
                .allow_loopback(allow_loopback);
            if let Some(secs) = timeout_http {
                builder = builder.timeout_http(Duration::from_secs(secs));
            }
            if let Some(secs) = timeout_browser {
                builder = builder.timeout_browser(Duration::from_secs(secs));
            }
            if let Some(bytes) = max_body_size {
                builder = builder.max_body_size(bytes);
            }
            if let Some(ms) = politeness_ms {
                builder = builder.politeness_delay(Duration::from_millis(ms));
            }
            let config = match builder.build() {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("invalid arguments: {err:#}");
                    return Ok(EXIT_INVALID);
                }
            };
            run_job_to_end(&manager, id, JobKind::Web, config).await
        }

        Commands::Render {
            url,
            depth,
            force,
            id,
            timeout_browser,
            politeness_ms,
            allow_loopback,
        } => {
            let mut builder = CrawlConfig::builder()
                .start_url(url)
                .max_depth(depth)
                .force(force)
                .initial_fetcher(FetcherKind::Browser)
                .allow_loopback(allow_loopback);
            if let Some(secs) = timeout_browser {
                builder = builder.timeout_browser(Duration::from_secs(secs));
            }
            if let Some(ms) = politeness_ms {
                builder = builder.politeness_delay(Duration::from_millis(ms));
            }
            let config = match builder.build() {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("invalid arguments: {err:#}");
                    return Ok(EXIT_INVALID);
                }
            };
            run_job_to_end(&manager, id, JobKind::Browser, config).await
        }

        Commands::Repo {
            repo_url,
            doc_subpath,
            id,
        } => {
            let accepted = match manager.submit_repo(id, repo_url, doc_subpath) {
                Ok(accepted) => accepted,
                Err(err) => {
                    eprintln!("rejected: {err}");
                    return Ok(EXIT_INVALID);
                }
            };
            finish(&manager, &accepted.id).await
        }

        Commands::Status { id } => match manager.status(&id).await {
            Some(snapshot) => {
                print_snapshot(&snapshot);
                Ok(EXIT_OK)
            }
            None => {
                eprintln!("job {id:?} is not known to this process");
                Ok(EXIT_NOT_FOUND)
            }
        },

        Commands::Search {
            id,
            scan_keywords,
            selector,
            extract_keywords,
            json,
        } => {
            let request = SearchRequest {
                job_id: id,
                scan_keywords,
                selector,
                extract_keywords,
            };
            match docharvest::run_search(&workspace, &request).await {
                Ok(hits) => {
                    for hit in &hits {
                        if json {
                            println!("{}", serde_json::to_string(hit)?);
                        } else {
                            println!("{}\t{}", hit.original_url, hit.extracted_text);
                        }
                    }
                    Ok(EXIT_OK)
                }
                Err(SearchError::JobNotFound(id)) => {
                    eprintln!("no index for job {id:?}");
                    Ok(EXIT_NOT_FOUND)
                }
                Err(SearchError::InvalidSelector { selector, message }) => {
                    eprintln!("invalid selector {selector:?}: {message}");
                    Ok(EXIT_INVALID)
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

async fn run_job_to_end(
    manager: &JobManager,
    id: Option<String>,
    kind: JobKind,
    config: CrawlConfig,
) -> Result<u8> {
    let accepted = match manager.submit_crawl(id, kind, config) {
        Ok(accepted) => accepted,
        Err(err) => {
            eprintln!("rejected: {err}");
            return Ok(EXIT_INVALID);
        }
    };
    finish(manager, &accepted.id).await
}

async fn finish(manager: &JobManager, id: &str) -> Result<u8> {
    let Some(snapshot) = manager.wait(id).await else {
        return Ok(EXIT_NOT_FOUND);
    };
    print_snapshot(&snapshot);
    match snapshot.status {
        JobStatus::Completed => Ok(EXIT_OK),
        _ => Ok(EXIT_JOB_FAILED),
    }
}

fn print_snapshot(snapshot: &JobSnapshot) {
    println!(
        "{} [{}] {:?}{}",
        snapshot.id,
        match snapshot.kind {
            JobKind::Web => "web",
            JobKind::Browser => "browser",
            JobKind::Repo => "repo",
        },
        snapshot.status,
        snapshot
            .message
            .as_deref()
            .map(|m| format!(": {m}"))
            .unwrap_or_default()
    );
    if let Some(detail) = &snapshot.error_detail {
        eprintln!("  {detail}");
    }
}
