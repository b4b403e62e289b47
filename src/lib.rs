//! Concurrent, polite, resumable web crawler library.
//!
//! A pool of workers drains a deduplicating priority [`Frontier`], fetches
//! pages through a pluggable [`Fetcher`], extracts title/metadata/text/links
//! from the HTML stream, feeds discovered links back into the frontier, and
//! reports results through embedder callbacks. Robots.txt rules and
//! per-domain delays are honored, and crawl state can be snapshotted to
//! disk and resumed.
//!
//! ```no_run
//! use trawl::{Crawler, CrawlConfig};
//!
//! # async fn run() -> Result<(), trawl::CrawlError> {
//! let crawler = Crawler::new(CrawlConfig::default())?
//!     .on_result(|page| println!("{} [{}]", page.url, page.status_code));
//! let stats = crawler.crawl("https://example.com/").await?;
//! println!("fetched {} pages", stats.pages_success);
//! # Ok(())
//! # }
//! ```

mod crawler;

pub use crawler::Crawler;

pub use trawl_client::HttpClient;
pub use trawl_core::{
    domain_of, in_scope, is_valid_crawl_url, normalize_url, origin_of, CrawlConfig, CrawlError,
    CrawlResult, CrawlScope, CrawlStats, ExtractedPage, FetchConfig, FetchResponse, Fetcher,
    GlobFilter, ProgressCallback, ResultCallback, UrlEntry,
};
pub use trawl_frontier::Frontier;
pub use trawl_parser::{extract_page, extract_response};
pub use trawl_robots::{parse_robots, RobotsCache, RobotsData};
pub use trawl_sitemap::SitemapEntry;
pub use trawl_storage::{state_info, CrawlState, StateStore};
