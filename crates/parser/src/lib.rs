mod extract;

pub use extract::extract_page;

use trawl_core::{CrawlError, ExtractedPage, FetchResponse};

/// Max bytes to tokenize (5 MB). Larger pages are truncated before parsing.
const MAX_PARSE_SIZE: usize = 5 * 1024 * 1024;

/// Extract page data from a fetched response, resolving links against the
/// response's final URL.
pub fn extract_response(resp: &FetchResponse) -> Result<ExtractedPage, CrawlError> {
    let body = if resp.body.len() > MAX_PARSE_SIZE {
        &resp.body[..MAX_PARSE_SIZE]
    } else {
        &resp.body[..]
    };
    let html = String::from_utf8_lossy(body);
    extract_page(&html, &resp.final_url)
}
