use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrawlError;

/// A frontier entry: a canonical URL waiting to be fetched.
/// Lower `priority` values are dispatched first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntry {
    pub url: String,
    pub depth: u32,
    pub priority: i64,
}

/// What we emit for every successfully fetched HTML page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: String,
    pub language: Option<String>,
    pub domain: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub depth: u32,
    pub links: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub crawled_at: DateTime<Utc>,
    pub fetch_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running counters for one crawl.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_success: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub bytes_fetched: u64,
    pub elapsed_ms: u64,
    pub pages_per_second: f64,
}

/// Transient per-page extraction output.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub content: String,
    pub links: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Request parameters shared by every fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_body_size: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("trawl/{}", env!("CARGO_PKG_VERSION")),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            accept_language: "en-US,en;q=0.5".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_body_size: 10 * 1024 * 1024,
            max_redirects: 10,
        }
    }
}

/// A fetched response, body fully buffered up to the configured cap.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// The HTTP seam. The crawler, robots cache, and sitemap resolver all go
/// through this trait, so tests and embedders can substitute transports.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError>;
}

/// Invoked from worker tasks; may run concurrently.
pub type ResultCallback = Arc<dyn Fn(CrawlResult) + Send + Sync>;

/// Invoked from worker tasks after every processed URL; may run concurrently.
pub type ProgressCallback = Arc<dyn Fn(CrawlStats) + Send + Sync>;
