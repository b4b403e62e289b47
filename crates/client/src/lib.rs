use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::{header, redirect, Client};
use tracing::trace;
use url::Url;

use trawl_core::{CrawlError, FetchConfig, Fetcher, FetchResponse};

/// Default `Fetcher` backed by a shared reqwest client. Safe for
/// concurrent use from all workers.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| CrawlError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &Url, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let started = Instant::now();

        let resp = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, &config.accept)
            .header(header::ACCEPT_LANGUAGE, &config.accept_language)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrawlError::Fetch(format!("timeout after {:?}: {url}", config.timeout))
                } else if e.is_redirect() {
                    CrawlError::Fetch(format!("redirect limit exceeded: {url}"))
                } else {
                    CrawlError::Fetch(format!("{url}: {e}"))
                }
            })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let mut stream = resp.bytes_stream();
        let mut body = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| CrawlError::Fetch(format!("body stream: {url}: {e}")))?;
            if body.len() + chunk.len() > config.max_body_size {
                return Err(CrawlError::BodyTooLarge {
                    size: body.len() + chunk.len(),
                    max: config.max_body_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let response_time_ms = started.elapsed().as_millis() as u64;
        trace!(url = %url, status, bytes = body.len(), response_time_ms, "fetched");

        Ok(FetchResponse {
            final_url,
            status,
            content_type,
            headers,
            body: body.to_vec(),
            fetched_at: Utc::now(),
            response_time_ms,
        })
    }
}
