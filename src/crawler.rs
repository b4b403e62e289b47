use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use trawl_client::HttpClient;
use trawl_core::{
    domain_of, in_scope, normalize_url, CrawlConfig, CrawlError, CrawlResult, CrawlStats,
    FetchConfig, FetchResponse, Fetcher, GlobFilter, ProgressCallback, ResultCallback, UrlEntry,
};
use trawl_frontier::Frontier;
use trawl_parser::extract_response;
use trawl_robots::RobotsCache;
use trawl_storage::{CrawlState, StateStore};

/// Snapshot after every N fetched pages when a state file is configured.
const SNAPSHOT_INTERVAL: u64 = 10;

/// Backoff while the frontier is empty but siblings are still processing.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Counters {
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.success.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::SeqCst);
    }

    fn restore(&self, stats: &CrawlStats) {
        self.success.store(stats.pages_success, Ordering::SeqCst);
        self.failed.store(stats.pages_failed, Ordering::SeqCst);
        self.skipped.store(stats.pages_skipped, Ordering::SeqCst);
        self.bytes.store(stats.bytes_fetched, Ordering::SeqCst);
    }

    fn fetched(&self) -> u64 {
        self.success.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }
}

struct RunInfo {
    start_url: Option<Url>,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// The crawl orchestrator. Cheap to clone; clones share all state, which
/// is how worker tasks and cancellation handles are handed out.
#[derive(Clone)]
pub struct Crawler {
    config: CrawlConfig,
    fetch_config: FetchConfig,
    globs: Arc<GlobFilter>,
    fetcher: Arc<dyn Fetcher>,
    frontier: Arc<Frontier>,
    robots: Arc<RobotsCache>,
    counters: Arc<Counters>,
    active: Arc<AtomicUsize>,
    run: Arc<RwLock<RunInfo>>,
    cancelled: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    last_snapshot: Arc<AtomicU64>,
    store: Option<Arc<StateStore>>,
    on_result: Option<ResultCallback>,
    on_progress: Option<ProgressCallback>,
}

impl Crawler {
    /// Build a crawler with the default reqwest-backed HTTP client.
    pub fn new(config: CrawlConfig) -> Result<Self, CrawlError> {
        let fetch_config = fetch_config_from(&config);
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpClient::new(&fetch_config)?);
        Self::with_fetcher(config, fetcher)
    }

    /// Build a crawler on top of a custom transport.
    pub fn with_fetcher(config: CrawlConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, CrawlError> {
        config.validate()?;
        let globs = GlobFilter::new(&config.include_globs, &config.exclude_globs)?;
        let fetch_config = fetch_config_from(&config);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            frontier: Arc::new(Frontier::new(config.delay)),
            robots: Arc::new(RobotsCache::new(Arc::clone(&fetcher), fetch_config.clone())),
            store: config.state_file.as_ref().map(|p| Arc::new(StateStore::new(p.clone()))),
            globs: Arc::new(globs),
            fetcher,
            fetch_config,
            counters: Arc::new(Counters::default()),
            active: Arc::new(AtomicUsize::new(0)),
            run: Arc::new(RwLock::new(RunInfo {
                start_url: None,
                started: Instant::now(),
                started_at: Utc::now(),
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            last_snapshot: Arc::new(AtomicU64::new(0)),
            on_result: None,
            on_progress: None,
            config,
        })
    }

    /// Register the per-page callback. Invoked from worker tasks, possibly
    /// concurrently.
    pub fn on_result(mut self, callback: impl Fn(CrawlResult) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(callback));
        self
    }

    /// Register the progress callback. Invoked from worker tasks after
    /// every processed URL, possibly concurrently.
    pub fn on_progress(mut self, callback: impl Fn(CrawlStats) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Crawl outward from `start_url` until the frontier drains, the page
    /// budget is reached, or [`cancel`](Self::cancel) fires. Restores
    /// saved state first when a state file is configured and present.
    pub async fn crawl(&self, start_url: &str) -> Result<CrawlStats, CrawlError> {
        let canonical = normalize_url(start_url)?;
        let start = Url::parse(&canonical)
            .map_err(|e| CrawlError::InvalidUrl(format!("{canonical}: {e}")))?;
        self.begin_run(start);

        if let Some(store) = &self.store {
            match store.load() {
                Ok(Some(state)) => {
                    info!(
                        path = %store.path().display(),
                        visited = state.visited.len(),
                        pending = state.pending.len(),
                        "resuming from saved crawl state"
                    );
                    self.counters.restore(&state.stats);
                    self.last_snapshot.store(self.counters.fetched(), Ordering::SeqCst);
                    self.frontier.restore(&state.visited, &state.pending).await;
                    if let Ok(mut run) = self.run.write() {
                        run.started_at = state.started_at;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("could not restore crawl state, starting fresh: {e}"),
            }
        }

        self.frontier.push(&canonical, 0, 0).await?;
        self.run_workers().await
    }

    /// Crawl the URLs listed in a sitemap (or sitemap index), seeding the
    /// frontier in sitemap order. Fails with `MalformedSitemap` before any
    /// page work begins if the document is not a sitemap.
    pub async fn crawl_sitemap(&self, sitemap_url: &str) -> Result<CrawlStats, CrawlError> {
        let start = Url::parse(sitemap_url)
            .map_err(|e| CrawlError::InvalidUrl(format!("{sitemap_url}: {e}")))?;
        self.begin_run(start);

        let entries = trawl_sitemap::resolve(
            self.fetcher.as_ref(),
            &self.fetch_config,
            sitemap_url,
            self.config.max_pages as usize,
        )
        .await?;
        info!(count = entries.len(), sitemap = sitemap_url, "seeding frontier from sitemap");

        let batch: Vec<UrlEntry> = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| UrlEntry {
                url: entry.loc,
                depth: 0,
                priority: position as i64,
            })
            .collect();
        self.frontier.push_batch(batch).await;

        self.run_workers().await
    }

    /// Counters for the current (or last) crawl.
    pub fn stats(&self) -> CrawlStats {
        let success = self.counters.success.load(Ordering::SeqCst);
        let elapsed = self
            .run
            .read()
            .map(|run| run.started.elapsed())
            .unwrap_or_default();
        let secs = elapsed.as_secs_f64();
        CrawlStats {
            pages_success: success,
            pages_failed: self.counters.failed.load(Ordering::SeqCst),
            pages_skipped: self.counters.skipped.load(Ordering::SeqCst),
            bytes_fetched: self.counters.bytes.load(Ordering::SeqCst),
            elapsed_ms: elapsed.as_millis() as u64,
            pages_per_second: if secs > 0.0 { success as f64 / secs } else { 0.0 },
        }
    }

    /// Signal cancellation: workers stop picking up work, in-flight fetches
    /// are abandoned, and `crawl` returns `Err(Cancelled)` with the final
    /// counters still readable through [`stats`](Self::stats).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    fn begin_run(&self, start: Url) {
        if let Ok(mut run) = self.run.write() {
            run.start_url = Some(start);
            run.started = Instant::now();
            run.started_at = Utc::now();
        }
        self.counters.reset();
        self.active.store(0, Ordering::SeqCst);
        self.last_snapshot.store(0, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn start_url(&self) -> Option<Url> {
        self.run.read().ok().and_then(|run| run.start_url.clone())
    }

    async fn run_workers(&self) -> Result<CrawlStats, CrawlError> {
        info!(workers = self.config.workers, "starting crawl workers");
        let mut handles = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let crawler = self.clone();
            handles.push(tokio::spawn(async move {
                crawler.worker_loop(worker_id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.frontier.close().await;
        if let Err(e) = self.snapshot().await {
            warn!("final state snapshot failed: {e}");
        }

        let stats = self.stats();
        if self.cancelled.load(Ordering::SeqCst) {
            info!(
                pages = stats.pages_success,
                failed = stats.pages_failed,
                "crawl cancelled"
            );
            return Err(CrawlError::Cancelled);
        }
        info!(
            pages = stats.pages_success,
            failed = stats.pages_failed,
            skipped = stats.pages_skipped,
            "crawl finished"
        );
        Ok(stats)
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(worker_id, "worker started");
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            if self.counters.fetched() >= self.config.max_pages {
                debug!(worker_id, "page budget reached");
                break;
            }

            // raised before the pop so siblings never observe an empty
            // frontier with this worker's entry in flight
            self.active.fetch_add(1, Ordering::SeqCst);
            match self.frontier.try_pop().await {
                Some(entry) => {
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = self.process_entry(worker_id, &entry) => {}
                    }
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    self.maybe_snapshot().await;
                    if let Some(progress) = &self.on_progress {
                        progress(self.stats());
                    }
                }
                None => {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    if self.active.load(Ordering::SeqCst) == 0 && self.frontier.is_empty().await {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = sleep(IDLE_WAIT) => {}
                    }
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    async fn process_entry(&self, worker_id: usize, entry: &UrlEntry) {
        if entry.depth > self.config.max_depth {
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(worker_id, url = %entry.url, depth = entry.depth, "beyond max depth");
            return;
        }
        let Ok(url) = Url::parse(&entry.url) else {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return;
        };
        let Some(start_url) = self.start_url() else {
            return;
        };
        if !in_scope(&start_url, &url, self.config.scope) {
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(worker_id, url = %url, "out of scope");
            return;
        }
        if !self.globs.allows(&url) {
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(worker_id, url = %url, "filtered by glob patterns");
            return;
        }

        let robots = if self.config.respect_robots {
            let robots = self.robots.get(&url).await;
            if !robots.is_allowed(url.path()) {
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                debug!(worker_id, url = %url, "disallowed by robots.txt");
                return;
            }
            Some(robots)
        } else {
            None
        };

        let Some(domain) = domain_of(&url) else {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return;
        };
        self.frontier.wait_for_domain(&domain).await;
        if let Some(robots) = &robots {
            if robots.crawl_delay > self.config.delay {
                self.frontier.set_domain_delay(&domain, robots.crawl_delay).await;
            }
        }

        debug!(worker_id, url = %url, depth = entry.depth, "fetching");
        let resp = match self.fetch_page(&url).await {
            Ok(resp) => resp,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id, url = %url, "page failed: {e}");
                return;
            }
        };
        self.counters.bytes.fetch_add(resp.body.len() as u64, Ordering::SeqCst);

        let page = match extract_response(&resp) {
            Ok(page) => page,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id, url = %url, "extraction failed: {e}");
                return;
            }
        };

        let next_depth = entry.depth + 1;
        let discovered: Vec<UrlEntry> = page
            .links
            .iter()
            .map(|link| UrlEntry {
                url: link.clone(),
                depth: next_depth,
                priority: next_depth as i64,
            })
            .collect();
        let admitted = self.frontier.push_batch(discovered).await;
        if admitted > 0 {
            debug!(worker_id, url = %url, admitted, "links enqueued");
        }

        self.counters.success.fetch_add(1, Ordering::SeqCst);
        if let Some(on_result) = &self.on_result {
            on_result(CrawlResult {
                url: entry.url.clone(),
                title: page.title,
                description: page.description,
                content: page.content,
                language: page.language,
                domain,
                status_code: resp.status,
                content_type: resp.content_type,
                depth: entry.depth,
                links: page.links,
                metadata: page.metadata,
                crawled_at: resp.fetched_at,
                fetch_time_ms: resp.response_time_ms,
                error: None,
            });
        }
    }

    /// Fetch one page and apply the response gates: only a 200 with an
    /// HTML content type is worth extracting.
    async fn fetch_page(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        let resp = self.fetcher.fetch(url, &self.fetch_config).await?;
        if resp.status != 200 {
            return Err(CrawlError::HttpStatus(resp.status));
        }
        let is_html = resp
            .content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            })
            .unwrap_or(false);
        if !is_html {
            return Err(CrawlError::ContentType(
                resp.content_type.unwrap_or_else(|| "missing".to_string()),
            ));
        }
        Ok(resp)
    }

    /// Snapshot at every `SNAPSHOT_INTERVAL` fetched pages, gated on a
    /// monotonic marker so concurrent workers do not repeat a write for
    /// the same total.
    async fn maybe_snapshot(&self) {
        if self.store.is_none() {
            return;
        }
        let total = self.counters.fetched();
        if total == 0 || total % SNAPSHOT_INTERVAL != 0 {
            return;
        }
        let last = self.last_snapshot.load(Ordering::SeqCst);
        if last == total
            || self
                .last_snapshot
                .compare_exchange(last, total, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return;
        }
        if let Err(e) = self.snapshot().await {
            warn!("state snapshot failed: {e}");
        }
    }

    async fn snapshot(&self) -> Result<(), CrawlError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let (start_url, started_at) = match self.run.read() {
            Ok(run) => (
                run.start_url
                    .as_ref()
                    .map(|u| u.as_str().to_string())
                    .unwrap_or_default(),
                run.started_at,
            ),
            Err(_) => return Ok(()),
        };
        let state = CrawlState {
            start_url,
            started_at,
            updated_at: Utc::now(),
            stats: self.stats(),
            visited: self.frontier.visited_urls().await,
            pending: self.frontier.pending_entries().await,
        };
        store.save(&state)
    }
}

fn fetch_config_from(config: &CrawlConfig) -> FetchConfig {
    FetchConfig {
        user_agent: config.user_agent.clone(),
        timeout: config.timeout,
        ..FetchConfig::default()
    }
}
