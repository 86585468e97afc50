//! Downstream cache invalidation after a successful import.
//!
//! Invalidation is best-effort: the orchestrator logs a failure at WARN and
//! still reports the run as successful.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dumpsync_core::error::SyncError;

/// HTTP request timeout for a single invalidation call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The cache endpoint returned a non-2xx status code.
    #[error("Cache endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self) -> Result<(), CacheError>;
}

/// Used when no invalidation endpoint is configured.
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self) -> Result<(), CacheError> {
        tracing::debug!("No cache invalidation endpoint configured");
        Ok(())
    }
}

/// POSTs an invalidation notice to a configured URL.
pub struct HttpCacheInvalidator {
    client: reqwest::Client,
    url: String,
}

impl HttpCacheInvalidator {
    pub fn new(url: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CacheInvalidator for HttpCacheInvalidator {
    async fn invalidate(&self) -> Result<(), CacheError> {
        let payload = serde_json::json!({
            "reason": "import_completed",
            "timestamp": chrono::Utc::now(),
        });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(CacheError::HttpStatus(response.status().as_u16()));
        }
        tracing::debug!(url = %self.url, "Cache invalidated");
        Ok(())
    }
}

/// HTTP invalidator for `url`, or a no-op when none is configured.
pub fn build_invalidator(url: Option<&str>) -> Result<Arc<dyn CacheInvalidator>, SyncError> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Ok(Arc::new(HttpCacheInvalidator::new(url)?)),
        None => Ok(Arc::new(NoopCacheInvalidator)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert!(NoopCacheInvalidator.invalidate().await.is_ok());
    }

    #[test]
    fn http_status_display() {
        assert_eq!(
            CacheError::HttpStatus(503).to_string(),
            "Cache endpoint returned HTTP 503"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        // Nothing listens on port 1.
        let invalidator = HttpCacheInvalidator::new("http://127.0.0.1:1/invalidate").unwrap();
        assert_matches!(invalidator.invalidate().await, Err(CacheError::Request(_)));
    }
}
