//! HTTP fallback surface
//!
//! Deployments without the push channel drive the checker over plain HTTP:
//! `POST {base}/get` with `{url, interval}` starts a monitor and `DELETE
//! {base}/get/{url}` removes it. The client abstraction mirrors the rest of
//! the crate's I/O seams so tests never touch the network.

use async_trait::async_trait;

use crate::config::FallbackConfig;
use crate::error::{Result, SyncError};

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Abstraction over HTTP client for dependency injection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a POST request with a JSON body
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse>;

    /// Send a DELETE request
    async fn delete(&self, url: &str) -> Result<HttpResponse>;
}

/// Production HTTP client using reqwest
#[derive(Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn with_timeout(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Http(format!("Building HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Http(format!("POST {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Http(format!("Reading response body: {}", e)))?;

        tracing::debug!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }

    async fn delete(&self, url: &str) -> Result<HttpResponse> {
        tracing::debug!("DELETE {}", url);
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| SyncError::Http(format!("DELETE {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Http(format!("Reading response body: {}", e)))?;

        tracing::debug!("DELETE {} -> {}", url, status);
        Ok(HttpResponse { status, body })
    }
}

/// Typed wrapper over the fallback endpoints
pub struct FallbackApi {
    base_url: String,
    http: Box<dyn HttpClient>,
}

impl FallbackApi {
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(config.request_timeout_seconds);
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http: Box::new(ReqwestHttpClient::with_timeout(timeout)?),
        })
    }

    pub fn with_http_client(base_url: &str, http: Box<dyn HttpClient>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Start checking a url at the given interval
    pub async fn start_check(&self, url: &str, interval_seconds: u64) -> Result<()> {
        let endpoint = format!("{}/get", self.base_url);
        let body = serde_json::json!({ "url": url, "interval": interval_seconds });
        let response = self.http.post_json(&endpoint, &body).await?;
        if response.status >= 400 {
            return Err(SyncError::Http(format!(
                "POST {} returned {}",
                endpoint, response.status
            )));
        }
        Ok(())
    }

    /// Stop checking a url
    pub async fn remove_check(&self, url: &str) -> Result<()> {
        let endpoint = format!("{}/get/{}", self.base_url, url);
        let response = self.http.delete(&endpoint).await?;
        if response.status >= 400 {
            return Err(SyncError::Http(format!(
                "DELETE {} returned {}",
                endpoint, response.status
            )));
        }
        Ok(())
    }
}
