//! Remote content retrieval for linked entries and attachments

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::types::{DataFlowError, Result};

/// Maximum size of a single downloaded object (500 MB)
pub const MAX_FETCH_BYTES: u64 = 500 * 1024 * 1024;

/// Fetches content behind HTTP(S) links
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// GET a URL and return the body as text
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET a URL and stream the body into `dest`. Returns bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Whether a reference points at a remote HTTP(S) resource
pub fn is_remote(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// reqwest based fetcher
pub struct HttpFetcher {
    http_client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataFlowError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            max_bytes: MAX_FETCH_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_bytes {
                return Err(DataFlowError::Rejected(format!(
                    "Content too large: {} bytes (max: {})",
                    content_length, self.max_bytes
                )));
            }
        }
        Ok(response)
    }
}

/// Server-side and throttling failures may clear up; anything else will not
fn status_error(status: reqwest::StatusCode, url: &str) -> DataFlowError {
    let message = format!("HTTP {status} fetching {url}");
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        DataFlowError::Http(message)
    } else {
        DataFlowError::Rejected(message)
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        let text = response.text().await?;
        debug!(url = %url, size = text.len(), "Fetched linked content");
        Ok(text)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;
        let mut file = fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                warn!(url = %url, written, "Download exceeded size limit");
                return Err(DataFlowError::Rejected(format!(
                    "Content exceeded {} bytes",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url = %url, size = written, path = %dest.display(), "Downloaded attachment");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://hip.example/files/1.pdf"));
        assert!(is_remote("HTTP://hip.example/x"));
        assert!(!is_remote("/attachments/abc.pdf"));
        assert!(!is_remote("Binary/123"));
        assert!(!is_remote(""));
    }

    #[test]
    fn test_http_fetcher_builds() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(10);
        assert_eq!(fetcher.max_bytes, 10);
    }

    #[test]
    fn test_status_errors_split_by_retryability() {
        let url = "https://hip.example/x";
        assert!(status_error(reqwest::StatusCode::BAD_GATEWAY, url).is_transient());
        assert!(status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, url).is_transient());
        assert!(matches!(
            status_error(reqwest::StatusCode::NOT_FOUND, url),
            DataFlowError::Rejected(_)
        ));
    }
}
