use std::path::PathBuf;
use std::time::Duration;

use crate::error::CrawlError;
use crate::urlpolicy::CrawlScope;

/// Upper bound on concurrent workers. Beyond this the per-domain delay
/// dominates anyway and the pool only wastes memory.
const MAX_WORKERS: usize = 128;

/// Embedder-facing crawl configuration. All fields have working defaults;
/// construct with struct-update syntax and validate before use:
///
/// ```
/// use trawl_core::CrawlConfig;
///
/// let config = CrawlConfig {
///     max_pages: 500,
///     ..CrawlConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Number of concurrent crawl workers.
    pub workers: usize,
    /// Maximum link depth from the seed; the seed itself is depth 0.
    pub max_depth: u32,
    /// Stop after this many pages have been fetched (successes + failures).
    pub max_pages: u64,
    /// Base quiet interval between fetches to the same domain.
    pub delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User-Agent header, also matched against robots.txt groups.
    pub user_agent: String,
    /// Which discovered URLs are considered in-bounds.
    pub scope: CrawlScope,
    /// When non-empty, a URL must match at least one of these globs.
    pub include_globs: Vec<String>,
    /// A URL matching any of these globs is skipped.
    pub exclude_globs: Vec<String>,
    /// Honor robots.txt disallow rules and crawl-delay.
    pub respect_robots: bool,
    /// Snapshot/restore path; `None` disables persistence.
    pub state_file: Option<PathBuf>,
    /// Hint for consumers batching results downstream.
    pub batch_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_depth: 2,
            max_pages: 100,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            user_agent: format!("trawl/{}", env!("CARGO_PKG_VERSION")),
            scope: CrawlScope::SameDomain,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            respect_robots: true,
            state_file: None,
            batch_size: 10,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(CrawlError::InvalidConfig(format!(
                "workers must be in 1..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.max_pages == 0 {
            return Err(CrawlError::InvalidConfig("max_pages must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(CrawlError::InvalidConfig("timeout must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(CrawlError::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
