use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("unsupported content type: {0}")]
    ContentType(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("malformed sitemap: {0}")]
    MalformedSitemap(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("state io error: {0}")]
    StateIo(String),

    #[error("crawl cancelled")]
    Cancelled,
}
