use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use url::Url;

use trawl_core::{origin_of, FetchConfig, Fetcher};

/// Parsed robots.txt rules for one origin, reduced to the group that
/// applies to our User-Agent. An empty record allows everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsData {
    pub allowed: Vec<String>,
    pub disallowed: Vec<String>,
    pub crawl_delay: Duration,
    pub sitemaps: Vec<String>,
}

impl RobotsData {
    /// Allow rules win over disallow rules; anything unmatched is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.allowed.iter().any(|rule| rule_matches(rule, path)) {
            return true;
        }
        !self.disallowed.iter().any(|rule| rule_matches(rule, path))
    }
}

/// Anchored-prefix robots pattern match: `*` matches any run of
/// characters, a trailing `$` anchors the end of the path.
fn rule_matches(pattern: &str, path: &str) -> bool {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    let mut parts = body.split('*');
    let first = parts.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        return !anchored || pos == path.len();
    }
    for (i, part) in rest.iter().enumerate() {
        let last = i == rest.len() - 1;
        if part.is_empty() {
            // a trailing '*' swallows any suffix, anchored or not
            if last {
                return true;
            }
            continue;
        }
        if last && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}

/// Parse robots.txt, keeping the rules of the first `User-agent` group
/// that names a substring of our agent (or of its first `/`-delimited
/// token). If any specific group matched, wildcard `*` rules are ignored
/// entirely. `Sitemap` directives are collected globally.
pub fn parse_robots(content: &str, user_agent: &str) -> RobotsData {
    #[derive(Default)]
    struct Group {
        allowed: Vec<String>,
        disallowed: Vec<String>,
        delay: Option<u64>,
    }

    let ua = user_agent.to_lowercase();
    let ua_token = ua.split('/').next().unwrap_or("").trim().to_string();

    let mut wildcard = Group::default();
    let mut specific = Group::default();
    let mut sitemaps: Vec<String> = Vec::new();

    let mut in_rules = false;
    let mut group_wild = false;
    let mut group_specific = false;
    let mut specific_locked = false;
    let mut had_specific = false;

    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match name.as_str() {
            "user-agent" => {
                if in_rules {
                    // a new group header after rules closes the previous group
                    if group_specific {
                        specific_locked = true;
                    }
                    group_wild = false;
                    group_specific = false;
                    in_rules = false;
                }
                let agent = value.to_lowercase();
                if agent == "*" {
                    group_wild = true;
                } else if !specific_locked
                    && !agent.is_empty()
                    && (ua.contains(&agent) || ua_token.contains(&agent))
                {
                    group_specific = true;
                    had_specific = true;
                }
            }
            "disallow" => {
                in_rules = true;
                // empty Disallow means "no restriction"
                if !value.is_empty() {
                    if group_specific {
                        specific.disallowed.push(value.to_string());
                    }
                    if group_wild {
                        wildcard.disallowed.push(value.to_string());
                    }
                }
            }
            "allow" => {
                in_rules = true;
                if !value.is_empty() {
                    if group_specific {
                        specific.allowed.push(value.to_string());
                    }
                    if group_wild {
                        wildcard.allowed.push(value.to_string());
                    }
                }
            }
            "crawl-delay" => {
                in_rules = true;
                if let Ok(secs) = value.parse::<u64>() {
                    if group_specific {
                        specific.delay = Some(secs);
                    }
                    if group_wild {
                        wildcard.delay = Some(secs);
                    }
                }
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    let group = if had_specific { specific } else { wildcard };
    RobotsData {
        allowed: group.allowed,
        disallowed: group.disallowed,
        crawl_delay: Duration::from_secs(group.delay.unwrap_or(0)),
        sitemaps,
    }
}

/// Lazily populated per-origin robots.txt cache. A fetch failure or
/// non-2xx response yields the permissive record. Concurrent first
/// references to the same origin may fetch twice; the second insert wins
/// and both results are identical.
pub struct RobotsCache {
    origins: DashMap<String, Arc<RobotsData>>,
    fetcher: Arc<dyn Fetcher>,
    fetch_config: FetchConfig,
}

impl RobotsCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, fetch_config: FetchConfig) -> Self {
        Self {
            origins: DashMap::new(),
            fetcher,
            fetch_config,
        }
    }

    /// Rules for the origin of `url`, fetching `<origin>/robots.txt` on
    /// first reference.
    pub async fn get(&self, url: &Url) -> Arc<RobotsData> {
        let origin = origin_of(url);
        if let Some(data) = self.origins.get(&origin) {
            return Arc::clone(&data);
        }
        let data = Arc::new(self.fetch_robots(&origin).await);
        self.origins.insert(origin, Arc::clone(&data));
        data
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsData {
        let Ok(robots_url) = Url::parse(&format!("{origin}/robots.txt")) else {
            return RobotsData::default();
        };
        match self.fetcher.fetch(&robots_url, &self.fetch_config).await {
            Ok(resp) if (200..300).contains(&resp.status) => {
                let body = String::from_utf8_lossy(&resp.body);
                let data = parse_robots(&body, &self.fetch_config.user_agent);
                debug!(
                    origin,
                    disallowed = data.disallowed.len(),
                    allowed = data.allowed.len(),
                    delay_secs = data.crawl_delay.as_secs(),
                    "robots.txt parsed"
                );
                data
            }
            Ok(resp) => {
                debug!(origin, status = resp.status, "no robots.txt, allowing all");
                RobotsData::default()
            }
            Err(e) => {
                debug!(origin, "robots.txt fetch failed, allowing all: {e}");
                RobotsData::default()
            }
        }
    }
}
