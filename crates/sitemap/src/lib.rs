use std::collections::VecDeque;
use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};
use url::Url;

use trawl_core::{CrawlError, FetchConfig, Fetcher};

/// One `<url>` record from a urlset.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

enum Parsed {
    Urlset(Vec<SitemapEntry>),
    Index(Vec<String>),
}

/// Fetch a sitemap and return its URL entries in document order, up to
/// `limit`. A sitemap index is expanded breadth-first; broken children are
/// skipped, only the root document is fatal.
pub async fn resolve(
    fetcher: &dyn Fetcher,
    config: &FetchConfig,
    url: &str,
    limit: usize,
) -> Result<Vec<SitemapEntry>, CrawlError> {
    let root_url =
        Url::parse(url).map_err(|e| CrawlError::InvalidUrl(format!("{url}: {e}")))?;
    let body = fetch_body(fetcher, config, &root_url).await?;

    match parse_sitemap(&body)? {
        Parsed::Urlset(mut entries) => {
            entries.truncate(limit);
            Ok(entries)
        }
        Parsed::Index(children) => {
            debug!(url, children = children.len(), "expanding sitemap index");
            let mut out: Vec<SitemapEntry> = Vec::new();
            let mut queue: VecDeque<String> = children.into();
            while let Some(child) = queue.pop_front() {
                if out.len() >= limit {
                    break;
                }
                let Ok(child_url) = Url::parse(&child) else {
                    warn!(sitemap = %child, "skipping unparseable child sitemap location");
                    continue;
                };
                let body = match fetch_body(fetcher, config, &child_url).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(sitemap = %child, "skipping unreachable child sitemap: {e}");
                        continue;
                    }
                };
                match parse_sitemap(&body) {
                    Ok(Parsed::Urlset(entries)) => {
                        for entry in entries {
                            if out.len() >= limit {
                                break;
                            }
                            out.push(entry);
                        }
                    }
                    Ok(Parsed::Index(nested)) => queue.extend(nested),
                    Err(e) => warn!(sitemap = %child, "skipping malformed child sitemap: {e}"),
                }
            }
            Ok(out)
        }
    }
}

async fn fetch_body(
    fetcher: &dyn Fetcher,
    config: &FetchConfig,
    url: &Url,
) -> Result<Vec<u8>, CrawlError> {
    let resp = fetcher.fetch(url, config).await?;
    if !(200..300).contains(&resp.status) {
        return Err(CrawlError::HttpStatus(resp.status));
    }
    maybe_gunzip(&resp.body)
}

fn maybe_gunzip(bytes: &[u8]) -> Result<Vec<u8>, CrawlError> {
    // gzip magic bytes
    if bytes.len() >= 2 && bytes[0] == 0x1F && bytes[1] == 0x8B {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CrawlError::MalformedSitemap(format!("gunzip: {e}")))?;
        return Ok(out);
    }
    Ok(bytes.to_vec())
}

fn parse_sitemap(bytes: &[u8]) -> Result<Parsed, CrawlError> {
    enum Root {
        Unknown,
        Urlset,
        Index,
    }
    enum Field {
        Loc,
        Lastmod,
        Changefreq,
        Priority,
    }

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut root = Root::Unknown;
    let mut entries: Vec<SitemapEntry> = Vec::new();
    let mut children: Vec<String> = Vec::new();
    let mut current = blank_entry();
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"urlset" => {
                    if matches!(root, Root::Unknown) {
                        root = Root::Urlset;
                    }
                }
                b"sitemapindex" => {
                    if matches!(root, Root::Unknown) {
                        root = Root::Index;
                    }
                }
                b"url" | b"sitemap" => current = blank_entry(),
                b"loc" => {
                    field = Some(Field::Loc);
                    text.clear();
                }
                b"lastmod" => {
                    field = Some(Field::Lastmod);
                    text.clear();
                }
                b"changefreq" => {
                    field = Some(Field::Changefreq);
                    text.clear();
                }
                b"priority" => {
                    field = Some(Field::Priority);
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => {
                    current.loc = text.trim().to_string();
                    field = None;
                }
                b"lastmod" => {
                    current.lastmod = parse_lastmod(text.trim());
                    field = None;
                }
                b"changefreq" => {
                    let value = text.trim();
                    current.changefreq = (!value.is_empty()).then(|| value.to_string());
                    field = None;
                }
                b"priority" => {
                    current.priority = text.trim().parse().ok();
                    field = None;
                }
                b"url" => {
                    if !current.loc.is_empty() {
                        entries.push(std::mem::replace(&mut current, blank_entry()));
                    }
                }
                b"sitemap" => {
                    if !current.loc.is_empty() {
                        children.push(std::mem::replace(&mut current, blank_entry()).loc);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CrawlError::MalformedSitemap(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    match root {
        Root::Urlset => Ok(Parsed::Urlset(entries)),
        Root::Index => Ok(Parsed::Index(children)),
        Root::Unknown => Err(CrawlError::MalformedSitemap(
            "document has neither <urlset> nor <sitemapindex>".into(),
        )),
    }
}

fn blank_entry() -> SitemapEntry {
    SitemapEntry {
        loc: String::new(),
        lastmod: None,
        changefreq: None,
        priority: None,
    }
}

/// `<lastmod>` in RFC3339 (`Z` or `±HH:MM` offsets), a naive
/// `YYYY-MM-DDTHH:MM:SS`, or a bare `YYYY-MM-DD`.
fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    None
}
