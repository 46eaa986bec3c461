//! docharvest: documentation acquisition and search.
//!
//! Given a root URL or a Git repository, docharvest builds a local,
//! addressable archive of documentation artifacts plus a line-delimited
//! JSON index, then answers two-phase searches (keyword scan followed by
//! CSS-selector extraction) joined back to originating URLs.
//!
//! The two load-bearing pieces are the crawl engine ([`engine`]), with its
//! bounded concurrency, per-authority politeness, same-authority scoping,
//! visited-set dedup and HTTP-to-browser fallback, and the search pipeline
//! ([`search`]) over the per-job index ([`index`]).

pub mod cancel;
pub mod canon;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod index;
pub mod jobs;
pub mod layout;
pub mod repo;
pub mod robots;
pub mod search;

pub use cancel::CancelToken;
pub use config::{CrawlConfig, CrawlConfigBuilder};
pub use engine::{crawl, CrawlSummary};
pub use fetch::{FallbackPolicy, FetchStatus, FetcherKind};
pub use index::{read_index, IndexRecord, IndexWriter};
pub use jobs::{JobAccepted, JobKind, JobManager, JobRequest, JobSnapshot, JobStatus};
pub use layout::Workspace;
pub use search::{run_search, SearchError, SearchHit, SearchRequest};
