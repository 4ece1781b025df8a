//! Remote Content Fetcher.
//!
//! GETs a URL and hands back the body plus a content type: the response
//! header when present, otherwise a guess from the URL path.

use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("HTTP client init failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// Downloaded body and its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, raw_url: &str) -> Result<FetchedContent, FetchError> {
        let url = Url::parse(raw_url).map_err(|e| FetchError::InvalidUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: raw_url.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: raw_url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: raw_url.to_string(),
                status: status.as_u16(),
            });
        }

        let header_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let bytes = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: raw_url.to_string(),
                source,
            })?
            .to_vec();

        let content_type = header_type.unwrap_or_else(|| guess_content_type(&url));
        debug!("Fetched {} ({} bytes, {})", raw_url, bytes.len(), content_type);
        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }
}

/// Content type from the URL's file extension.
pub fn guess_content_type(url: &Url) -> String {
    mime_guess::from_path(url.path())
        .first_or_octet_stream()
        .to_string()
}
