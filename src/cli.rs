use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use docharvest::FallbackPolicy;

#[derive(Parser)]
#[command(
    name = "docharvest",
    version,
    about = "Acquire documentation sites and repositories, then search them"
)]
pub struct Cli {
    /// Workspace root holding content trees and job indexes
    #[arg(short, long, default_value = "./harvest", env = "DOCHARVEST_ROOT")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a documentation site, starting with the lightweight HTTP fetcher
    Crawl {
        /// Start URL; the crawl never leaves its authority
        url: String,

        /// Maximum link depth from the start URL
        #[arg(short, long, default_value_t = 2)]
        depth: u32,

        /// Re-fetch URLs whose content was already saved
        #[arg(long)]
        force: bool,

        /// Job id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// When to upgrade a fetched page to a browser render
        #[arg(long, value_enum, default_value = "on-js-shell")]
        fallback: FallbackArg,

        /// Per-attempt HTTP timeout in seconds
        #[arg(long)]
        timeout_http: Option<u64>,

        /// Per-attempt browser timeout in seconds
        #[arg(long)]
        timeout_browser: Option<u64>,

        /// Maximum body size in bytes
        #[arg(long)]
        max_body_size: Option<usize>,

        /// Minimum gap between fetches to the authority, in milliseconds
        #[arg(long)]
        politeness_ms: Option<u64>,

        /// Permit loopback targets (locally served documentation)
        #[arg(long)]
        allow_loopback: bool,
    },

    /// Crawl with the browser-render fetcher from the start
    Render {
        url: String,

        #[arg(short, long, default_value_t = 2)]
        depth: u32,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        timeout_browser: Option<u64>,

        #[arg(long)]
        politeness_ms: Option<u64>,

        #[arg(long)]
        allow_loopback: bool,
    },

    /// Acquire documentation from a Git repository
    Repo {
        /// Clone URL understood by the external git client
        repo_url: String,

        /// Subdirectory holding the documentation
        #[arg(long, default_value = "docs")]
        doc_subpath: String,

        #[arg(long)]
        id: Option<String>,
    },

    /// Show the status of a job admitted by this process
    Status { id: String },

    /// Two-phase search within a finished job's archive
    Search {
        /// Job id whose index to search
        id: String,

        /// Keywords every candidate page must contain (comma-separated)
        #[arg(short = 'k', long, value_delimiter = ',')]
        scan_keywords: Vec<String>,

        /// CSS selector extracted from candidate pages
        #[arg(short, long)]
        selector: String,

        /// Keywords every extracted fragment must contain (comma-separated)
        #[arg(long, value_delimiter = ',')]
        extract_keywords: Vec<String>,

        /// Emit results as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackArg {
    Never,
    OnJsShell,
    Always,
}

impl From<FallbackArg> for FallbackPolicy {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Never => FallbackPolicy::Never,
            FallbackArg::OnJsShell => FallbackPolicy::OnJsShell,
            FallbackArg::Always => FallbackPolicy::Always,
        }
    }
}
