use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrawlError;

/// Path extensions that never yield crawlable HTML. The HTTP content-type
/// is still the authoritative gate at fetch time.
const SKIP_EXTENSIONS: &[&str] = &[
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // images
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "tiff",
    // video
    "mp4", "avi", "mov", "wmv", "flv", "webm", "mkv",
    // audio
    "mp3", "wav", "ogg", "flac", "m4a", "aac",
    // archives
    "zip", "rar", "tar", "gz", "7z", "bz2", "xz",
    // binaries
    "exe", "dmg", "bin", "iso", "apk", "msi", "deb", "rpm",
    // styles and scripts
    "css", "js", "mjs",
    // fonts
    "woff", "woff2", "ttf", "eot", "otf",
    // data and feeds
    "xml", "json", "rss", "atom",
];

/// Traversal scope relative to the start URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlScope {
    /// Exact hostname match.
    SameDomain,
    /// Start hostname and any of its subdomains.
    SameHost,
    /// Same hostname, path under the start URL's directory.
    Subpath,
}

impl Default for CrawlScope {
    fn default() -> Self {
        Self::SameDomain
    }
}

/// Canonicalize a URL so that equality is byte equality.
///
/// Only `http` and `https` are accepted. The parser already lowercases
/// scheme and host, strips default ports, resolves dot-segments, and turns
/// an empty path into `/`; on top of that the fragment is dropped and the
/// raw query pairs are stably sorted by key, leaving percent-encoding
/// exactly as parsed.
pub fn normalize_url(raw: &str) -> Result<String, CrawlError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CrawlError::InvalidUrl(format!(
                "unsupported scheme {other:?}: {raw}"
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(CrawlError::InvalidUrl(format!("missing host: {raw}")));
    }

    url.set_fragment(None);

    match url.query() {
        Some("") => url.set_query(None),
        Some(query) => {
            let mut pairs: Vec<&str> = query.split('&').collect();
            pairs.sort_by(|a, b| query_key(a).cmp(query_key(b)));
            let sorted = pairs.join("&");
            url.set_query(Some(&sorted));
        }
        None => {}
    }

    Ok(url.into())
}

fn query_key(pair: &str) -> &str {
    pair.split('=').next().unwrap_or(pair)
}

/// Whether `target` is in-bounds for a crawl started at `start`.
pub fn in_scope(start: &Url, target: &Url, scope: CrawlScope) -> bool {
    let (Some(start_host), Some(target_host)) = (start.host_str(), target.host_str()) else {
        return false;
    };
    let start_host = start_host.to_ascii_lowercase();
    let target_host = target_host.to_ascii_lowercase();

    match scope {
        CrawlScope::SameDomain => target_host == start_host,
        CrawlScope::SameHost => {
            target_host == start_host || target_host.ends_with(&format!(".{start_host}"))
        }
        CrawlScope::Subpath => {
            if target_host != start_host {
                return false;
            }
            let prefix = dir_prefix(start.path());
            let path = target.path();
            path == prefix.trim_end_matches('/') || path.starts_with(prefix)
        }
    }
}

/// Directory part of a path, trailing slash included:
/// `/docs/intro.html` -> `/docs/`, `/docs/` -> `/docs/`, `/docs` -> `/`.
fn dir_prefix(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    }
}

/// Compiled include/exclude shell-style patterns, matched against the URL
/// path and falling back to the full URL.
#[derive(Debug, Default)]
pub struct GlobFilter {
    includes: Option<GlobSet>,
    excludes: Option<GlobSet>,
}

impl GlobFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, CrawlError> {
        Ok(Self {
            includes: build_globset(include)?,
            excludes: build_globset(exclude)?,
        })
    }

    pub fn allows(&self, url: &Url) -> bool {
        let path = url.path();
        let full = url.as_str();
        if let Some(includes) = &self.includes {
            if !includes.is_match(path) && !includes.is_match(full) {
                return false;
            }
        }
        if let Some(excludes) = &self.excludes {
            if excludes.is_match(path) || excludes.is_match(full) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, CrawlError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| CrawlError::InvalidConfig(format!("bad glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| CrawlError::InvalidConfig(format!("glob set: {e}")))?;
    Ok(Some(set))
}

/// Heuristic pre-fetch filter: parseable http(s) URL whose path extension
/// is not a known binary/media/style/feed format.
pub fn is_valid_crawl_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => !SKIP_EXTENSIONS.contains(&ext),
        _ => true,
    }
}

/// Lowercase hostname, the key of the per-domain politeness clock.
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}

/// `scheme://host[:port]`, the robots cache key.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_one_canonical_form() {
        let a = normalize_url("https://EXAMPLE.COM:443/a/./b/../c?z=1&a=2#frag").unwrap();
        let b = normalize_url("HTTPS://example.com/a/c?a=2&z=1").unwrap();
        assert_eq!(a, "https://example.com/a/c?a=2&z=1");
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_is_idempotent() {
        let urls = [
            "http://example.com",
            "https://example.com/x/?b=2&a=1",
            "http://example.com:8080/path",
            "https://example.com/a%20b?q=%2Ffoo",
        ];
        for raw in urls {
            let once = normalize_url(raw).unwrap();
            let twice = normalize_url(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn normalize_defaults_empty_path() {
        assert_eq!(normalize_url("http://example.com").unwrap(), "http://example.com/");
    }

    #[test]
    fn normalize_keeps_non_default_port() {
        assert_eq!(
            normalize_url("http://example.com:8080/x").unwrap(),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn normalize_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_err());
        assert!(normalize_url("mailto:someone@example.com").is_err());
        assert!(normalize_url("not a url at all").is_err());
    }

    #[test]
    fn query_sort_is_stable_for_repeated_keys() {
        let u = normalize_url("http://example.com/?b=2&a=first&a=second").unwrap();
        assert_eq!(u, "http://example.com/?a=first&a=second&b=2");
    }

    #[test]
    fn scope_same_domain() {
        let start = Url::parse("https://example.com/").unwrap();
        let same = Url::parse("https://example.com/about").unwrap();
        let sub = Url::parse("https://sub.example.com/x").unwrap();
        let other = Url::parse("https://other.com/").unwrap();
        assert!(in_scope(&start, &same, CrawlScope::SameDomain));
        assert!(!in_scope(&start, &sub, CrawlScope::SameDomain));
        assert!(!in_scope(&start, &other, CrawlScope::SameDomain));
    }

    #[test]
    fn scope_same_host_includes_subdomains() {
        let start = Url::parse("https://example.com/").unwrap();
        let sub = Url::parse("https://docs.example.com/x").unwrap();
        let lookalike = Url::parse("https://notexample.com/").unwrap();
        assert!(in_scope(&start, &sub, CrawlScope::SameHost));
        assert!(!in_scope(&start, &lookalike, CrawlScope::SameHost));
    }

    #[test]
    fn scope_subpath() {
        let start = Url::parse("https://example.com/docs/intro.html").unwrap();
        let inside = Url::parse("https://example.com/docs/guide/x").unwrap();
        let exact = Url::parse("https://example.com/docs").unwrap();
        let outside = Url::parse("https://example.com/blog/post").unwrap();
        let elsewhere = Url::parse("https://other.com/docs/guide").unwrap();
        assert!(in_scope(&start, &inside, CrawlScope::Subpath));
        assert!(in_scope(&start, &exact, CrawlScope::Subpath));
        assert!(!in_scope(&start, &outside, CrawlScope::Subpath));
        assert!(!in_scope(&start, &elsewhere, CrawlScope::Subpath));
    }

    #[test]
    fn glob_include_and_exclude() {
        let filter = GlobFilter::new(
            &["/docs/*".to_string(), "/blog/**".to_string()],
            &["/docs/private*".to_string()],
        )
        .unwrap();
        let ok = Url::parse("https://example.com/docs/intro").unwrap();
        let deep = Url::parse("https://example.com/blog/2024/post").unwrap();
        let private = Url::parse("https://example.com/docs/private-notes").unwrap();
        let off = Url::parse("https://example.com/shop/cart").unwrap();
        assert!(filter.allows(&ok));
        assert!(filter.allows(&deep));
        assert!(!filter.allows(&private));
        assert!(!filter.allows(&off));
    }

    #[test]
    fn empty_globs_allow_everything() {
        let filter = GlobFilter::new(&[], &[]).unwrap();
        let url = Url::parse("https://example.com/anything/at/all").unwrap();
        assert!(filter.allows(&url));
    }

    #[test]
    fn rejects_bad_glob_patterns() {
        assert!(GlobFilter::new(&["[".to_string()], &[]).is_err());
    }

    #[test]
    fn crawl_worthiness_blocklist() {
        assert!(is_valid_crawl_url("https://example.com/page"));
        assert!(is_valid_crawl_url("https://example.com/article.html"));
        assert!(is_valid_crawl_url("https://example.com/v1.2/api-docs"));
        assert!(!is_valid_crawl_url("https://example.com/report.pdf"));
        assert!(!is_valid_crawl_url("https://example.com/logo.PNG"));
        assert!(!is_valid_crawl_url("https://example.com/feed.rss"));
        assert!(!is_valid_crawl_url("https://example.com/app.js"));
        assert!(!is_valid_crawl_url("ftp://example.com/page"));
        assert!(!is_valid_crawl_url("no-scheme"));
    }

    #[test]
    fn origin_includes_scheme_and_port() {
        let url = Url::parse("https://Example.com/a/b").unwrap();
        assert_eq!(origin_of(&url), "https://example.com");
        let with_port = Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(origin_of(&with_port), "http://example.com:8080");
    }
}
