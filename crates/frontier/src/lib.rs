use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use priority_queue::PriorityQueue;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use trawl_core::{normalize_url, CrawlError, UrlEntry};

/// Canonical URL key for the priority queue (must be Hash + Eq).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct UrlKey(String);

/// Min-first rank: lower `priority` pops first, ties by admission order.
type Rank = Reverse<(i64, u64)>;

struct FrontierInner {
    queue: PriorityQueue<UrlKey, Rank>,
    entries: HashMap<String, UrlEntry>,
    visited: HashSet<String>,
    next_ready: HashMap<String, Instant>,
    seq: u64,
    closed: bool,
}

impl FrontierInner {
    fn admit(&mut self, canonical: String, depth: u32, priority: i64) {
        let rank = Reverse((priority, self.seq));
        self.seq += 1;
        self.entries.insert(
            canonical.clone(),
            UrlEntry { url: canonical.clone(), depth, priority },
        );
        self.queue.push(UrlKey(canonical), rank);
    }

    fn pop_entry(&mut self) -> Option<UrlEntry> {
        let (key, _rank) = self.queue.pop()?;
        self.entries.remove(&key.0)
    }
}

/// The crawl frontier: a deduplicating priority queue of URLs, the shared
/// visited set, and the per-domain politeness clock, all guarded by one
/// mutex. Admission is one-shot: a URL becomes visited when pushed, so it
/// can never be enqueued twice.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    notify: Notify,
    base_delay: Duration,
}

impl Frontier {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(FrontierInner {
                queue: PriorityQueue::new(),
                entries: HashMap::new(),
                visited: HashSet::new(),
                next_ready: HashMap::new(),
                seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            base_delay,
        }
    }

    /// Add a URL. Returns `Ok(false)` if its canonical form was already
    /// admitted at any point.
    pub async fn push(&self, url: &str, depth: u32, priority: i64) -> Result<bool, CrawlError> {
        let canonical = normalize_url(url)?;
        {
            let mut inner = self.inner.lock().await;
            if !inner.visited.insert(canonical.clone()) {
                return Ok(false);
            }
            inner.admit(canonical, depth, priority);
        }
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Add many URLs under a single lock. Entries that fail to normalize or
    /// were already admitted are dropped. Returns the number admitted.
    pub async fn push_batch(&self, batch: Vec<UrlEntry>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut admitted = 0;
        {
            let mut inner = self.inner.lock().await;
            for entry in batch {
                let Ok(canonical) = normalize_url(&entry.url) else {
                    continue;
                };
                if !inner.visited.insert(canonical.clone()) {
                    continue;
                }
                inner.admit(canonical, entry.depth, entry.priority);
                admitted += 1;
            }
        }
        if admitted > 0 {
            self.notify.notify_waiters();
        }
        admitted
    }

    /// Blocking pop: waits until an entry is available or the frontier is
    /// closed and drained, in which case it returns `None`.
    pub async fn pop(&self) -> Option<UrlEntry> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.pop_entry() {
                    return Some(entry);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Non-blocking pop.
    pub async fn try_pop(&self) -> Option<UrlEntry> {
        self.inner.lock().await.pop_entry()
    }

    /// Reserve the next fetch slot for `domain` and sleep until it opens.
    /// The reservation happens in one critical section, so concurrent
    /// workers targeting the same domain serialize at `base_delay` spacing.
    pub async fn wait_for_domain(&self, domain: &str) {
        let ready = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let ready = inner
                .next_ready
                .get(domain)
                .copied()
                .map_or(now, |at| at.max(now));
            inner.next_ready.insert(domain.to_string(), ready + self.base_delay);
            ready
        };
        let now = Instant::now();
        if ready > now {
            debug!(domain, wait_ms = (ready - now).as_millis() as u64, "waiting for domain slot");
            sleep_until(ready).await;
        }
    }

    /// Override the domain's next-ready instant, e.g. to honor a robots
    /// crawl-delay longer than the base delay.
    pub async fn set_domain_delay(&self, domain: &str, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.next_ready.insert(domain.to_string(), Instant::now() + delay);
    }

    /// Enter a URL into the visited set without enqueuing it.
    /// Returns `Ok(false)` if it was already visited.
    pub async fn mark_visited(&self, url: &str) -> Result<bool, CrawlError> {
        let canonical = normalize_url(url)?;
        Ok(self.inner.lock().await.visited.insert(canonical))
    }

    /// Rebuild frontier state from a snapshot: `visited` URLs are marked
    /// without enqueuing, `pending` entries are re-admitted to the heap.
    pub async fn restore(&self, visited: &[String], pending: &[UrlEntry]) {
        {
            let mut inner = self.inner.lock().await;
            for url in visited {
                let canonical = normalize_url(url).unwrap_or_else(|_| url.clone());
                inner.visited.insert(canonical);
            }
            for entry in pending {
                let Ok(canonical) = normalize_url(&entry.url) else {
                    continue;
                };
                if inner.entries.contains_key(&canonical) {
                    continue;
                }
                inner.visited.insert(canonical.clone());
                inner.admit(canonical, entry.depth, entry.priority);
            }
            debug!(
                visited = inner.visited.len(),
                pending = inner.queue.len(),
                "frontier state restored"
            );
        }
        self.notify.notify_waiters();
    }

    pub async fn is_visited(&self, url: &str) -> bool {
        let Ok(canonical) = normalize_url(url) else {
            return false;
        };
        self.inner.lock().await.visited.contains(&canonical)
    }

    pub async fn visited_count(&self) -> usize {
        self.inner.lock().await.visited.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    /// Copy of the visited set, for snapshots.
    pub async fn visited_urls(&self) -> Vec<String> {
        self.inner.lock().await.visited.iter().cloned().collect()
    }

    /// Copy of the pending entries in dispatch order, for snapshots.
    pub async fn pending_entries(&self) -> Vec<UrlEntry> {
        let inner = self.inner.lock().await;
        inner
            .queue
            .clone()
            .into_sorted_iter()
            .filter_map(|(key, _rank)| inner.entries.get(&key.0).cloned())
            .collect()
    }

    /// Close the frontier: blocked `pop` calls drain what is left and then
    /// return `None`.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_deduplicates_on_canonical_form() {
        let frontier = Frontier::new(Duration::ZERO);
        assert!(frontier
            .push("https://EXAMPLE.COM:443/a/./b/../c?z=1&a=2#frag", 0, 0)
            .await
            .unwrap());
        assert!(!frontier
            .push("HTTPS://example.com/a/c?a=2&z=1", 0, 0)
            .await
            .unwrap());
        assert_eq!(frontier.len().await, 1);
        assert_eq!(frontier.visited_count().await, 1);
    }

    #[tokio::test]
    async fn pop_order_follows_priority_then_admission() {
        let frontier = Frontier::new(Duration::ZERO);
        frontier.push("http://example.com/low", 2, 2).await.unwrap();
        frontier.push("http://example.com/high", 0, 0).await.unwrap();
        frontier.push("http://example.com/mid-a", 1, 1).await.unwrap();
        frontier.push("http://example.com/mid-b", 1, 1).await.unwrap();

        let order: Vec<String> = [
            frontier.try_pop().await.unwrap(),
            frontier.try_pop().await.unwrap(),
            frontier.try_pop().await.unwrap(),
            frontier.try_pop().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.url)
        .collect();

        assert_eq!(
            order,
            vec![
                "http://example.com/high",
                "http://example.com/mid-a",
                "http://example.com/mid-b",
                "http://example.com/low",
            ]
        );
        assert!(frontier.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn depth_survives_from_push_to_pop() {
        let frontier = Frontier::new(Duration::ZERO);
        frontier.push("http://example.com/deep", 7, 7).await.unwrap();
        let entry = frontier.try_pop().await.unwrap();
        assert_eq!(entry.depth, 7);
        assert_eq!(entry.priority, 7);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push_and_close() {
        let frontier = std::sync::Arc::new(Frontier::new(Duration::ZERO));

        let popper = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };
        tokio::task::yield_now().await;
        frontier.push("http://example.com/", 0, 0).await.unwrap();
        let entry = popper.await.unwrap();
        assert_eq!(entry.unwrap().url, "http://example.com/");

        let drained = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };
        tokio::task::yield_now().await;
        frontier.close().await;
        assert!(drained.await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn domain_clock_spaces_consecutive_fetches() {
        let frontier = Frontier::new(Duration::from_millis(500));
        let begun = Instant::now();
        frontier.wait_for_domain("example.com").await;
        frontier.wait_for_domain("example.com").await;
        frontier.wait_for_domain("example.com").await;
        assert!(begun.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn domain_clock_is_per_domain() {
        let frontier = Frontier::new(Duration::from_secs(5));
        let begun = Instant::now();
        frontier.wait_for_domain("a.example.com").await;
        frontier.wait_for_domain("b.example.com").await;
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn domain_delay_override_extends_the_wait() {
        let frontier = Frontier::new(Duration::from_millis(100));
        frontier.wait_for_domain("example.com").await;
        frontier
            .set_domain_delay("example.com", Duration::from_secs(3))
            .await;
        let begun = Instant::now();
        frontier.wait_for_domain("example.com").await;
        assert!(begun.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn mark_visited_blocks_later_push() {
        let frontier = Frontier::new(Duration::ZERO);
        assert!(frontier.mark_visited("http://example.com/seen").await.unwrap());
        assert!(!frontier.push("http://example.com/seen", 0, 0).await.unwrap());
        assert_eq!(frontier.len().await, 0);
        assert!(frontier.is_visited("http://example.com/seen").await);
    }

    #[tokio::test]
    async fn restore_round_trips_visited_and_pending() {
        let frontier = Frontier::new(Duration::ZERO);
        frontier.push("http://example.com/done", 0, 0).await.unwrap();
        frontier.try_pop().await.unwrap();
        frontier.push("http://example.com/next", 1, 1).await.unwrap();

        let visited = frontier.visited_urls().await;
        let pending = frontier.pending_entries().await;
        assert_eq!(visited.len(), 2);
        assert_eq!(pending.len(), 1);

        let rebuilt = Frontier::new(Duration::ZERO);
        rebuilt.restore(&visited, &pending).await;
        assert_eq!(rebuilt.visited_count().await, 2);
        assert_eq!(rebuilt.len().await, 1);
        let entry = rebuilt.try_pop().await.unwrap();
        assert_eq!(entry.url, "http://example.com/next");
        assert_eq!(entry.depth, 1);
        assert!(!rebuilt.push("http://example.com/done", 0, 0).await.unwrap());
    }

    #[tokio::test]
    async fn pending_entries_preserve_dispatch_order() {
        let frontier = Frontier::new(Duration::ZERO);
        frontier.push("http://example.com/c", 0, 3).await.unwrap();
        frontier.push("http://example.com/a", 0, 1).await.unwrap();
        frontier.push("http://example.com/b", 0, 2).await.unwrap();
        let pending: Vec<String> =
            frontier.pending_entries().await.into_iter().map(|e| e.url).collect();
        assert_eq!(
            pending,
            vec!["http://example.com/a", "http://example.com/b", "http://example.com/c"]
        );
    }
}
