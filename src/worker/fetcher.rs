//! Page fetching
//!
//! `PageFetcher` is the seam between a worker and the network. `HttpFetcher`
//! does a plain GET with reqwest and extracts the page; tests substitute their
//! own implementations.

use crate::config::WorkerConfig;
use crate::worker::parser::{extract_page, PageContent};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

/// Ways a fetch can fail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Not an HTML page: {content_type}")]
    ContentMismatch { content_type: String },

    #[error("Request failed: {0}")]
    Network(String),
}

/// A fetched and extracted page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: String,
    pub content: PageContent,
}

/// Fetches one page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Builds the HTTP client shared by a worker's fetches
///
/// # Returns
///
/// * `Ok(Client)` - Client with the configured user agent and timeouts
/// * `Err(reqwest::Error)` - Failed to build the client
pub fn build_http_client(config: &WorkerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .connect_timeout(config.request_timeout())
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed [`PageFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &WorkerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Fetches a page and extracts it
    ///
    /// | Condition | Outcome |
    /// |-----------|---------|
    /// | 2xx with text/html | `Ok` |
    /// | 2xx, other content type | `ContentMismatch` |
    /// | Non-2xx status | `Http` |
    /// | Timeout | `Timeout` |
    /// | Connection refused, DNS, TLS | `Connect` |
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::debug!("Rate limited by {}", url);
            }
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") {
            return Err(FetchError::ContentMismatch { content_type });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(classify_error)?;
        let content = extract_page(&body, &final_url);

        Ok(FetchedPage {
            final_url: final_url.to_string(),
            content,
        })
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}
