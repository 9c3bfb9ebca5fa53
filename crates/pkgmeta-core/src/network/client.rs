//! HTTP fetching seam and its reqwest implementation.

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// GET-only HTTP access used by the remote tiers.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Fetch `url` as text.
    ///
    /// Returns `Ok(None)` when the server reports the resource missing.
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<Option<String>>;
}

/// reqwest-backed fetcher with a request timeout and user agent.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| MetadataError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self { client, timeout })
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn fetch(&self, url: &str) -> Result<Option<String>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                MetadataError::Timeout(self.timeout)
            } else {
                MetadataError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    cause: e.url().map(|u| u.to_string()),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            debug!("GET {} -> {}", url, status);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(MetadataError::Network {
                message: format!("GET {} returned {}", url, status),
                cause: None,
            });
        }

        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(Some(body))
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        cancel.check()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MetadataError::Cancelled),
            result = self.fetch(url) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpClient::with_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(client.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_does_not_send() {
        let client = HttpClient::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.get_text("http://127.0.0.1:9/never", &cancel).await;
        assert!(matches!(result, Err(MetadataError::Cancelled)));
    }
}
