//! Async HTTP client wrapping reqwest.
//!
//! Plain requests, no rendering. Server errors are retried with exponential
//! backoff and 429 replies honour `retry-after`. One client (and its
//! connection pool) is shared by every download of a batch.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use serde::Serialize;

use crate::types::{HarvestError, HarvestResult};

/// Accept header for image downloads, favouring modern formats.
pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

const MAX_RETRIES: u32 = 2;

/// Response from a page GET.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

/// Response from a binary GET.
#[derive(Debug, Clone)]
pub struct BinaryResponse {
    pub url: String,
    pub status: u16,
    /// Declared `Content-Type`, empty when absent.
    pub content_type: String,
    pub body: Vec<u8>,
}

impl BinaryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client for page discovery and asset acquisition.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client with the given user-agent and per-request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> HarvestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Fetch a page as text. Non-success statuses are transport failures.
    pub async fn get_page(&self, url: &str) -> HarvestResult<PageResponse> {
        let resp = self.send_with_retry(|| self.client.get(url)).await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        if !resp.status().is_success() {
            return Err(HarvestError::Transport(format!(
                "GET {url} returned status {status}"
            )));
        }
        let body = resp.text().await?;
        Ok(PageResponse {
            final_url,
            status,
            body,
        })
    }

    /// Fetch binary content with a referer and the image accept header.
    ///
    /// The status is returned as-is; callers decide what counts as failure.
    pub async fn get_image(&self, url: &str, referer: &str) -> HarvestResult<BinaryResponse> {
        let resp = self
            .send_with_retry(|| {
                self.client
                    .get(url)
                    .header(REFERER, referer)
                    .header(ACCEPT, IMAGE_ACCEPT)
            })
            .await?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.bytes().await?.to_vec();

        Ok(BinaryResponse {
            url: url.to_string(),
            status,
            content_type,
            body,
        })
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> HarvestResult<serde_json::Value> {
        let mut builder = self.client.post(url).timeout(timeout).json(body);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(HarvestError::Transport(format!(
                "POST {url} returned status {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Per-request timeout this client was built with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send_with_retry<F>(&self, build: F) -> HarvestResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retries = 0u32;

        loop {
            match build().send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    // Retry on 5xx
                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    return Ok(r);
                }
                Err(e) if e.is_timeout() => {
                    return Err(HarvestError::Transport(format!("request timed out: {e}")));
                }
                Err(e) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(HarvestError::Transport(e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new("test-agent", Duration::from_secs(5)).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_binary_success_range() {
        let mut resp = BinaryResponse {
            url: "https://example.com/a.jpg".to_string(),
            status: 200,
            content_type: "image/jpeg".to_string(),
            body: Vec::new(),
        };
        assert!(resp.is_success());
        resp.status = 404;
        assert!(!resp.is_success());
    }
}
