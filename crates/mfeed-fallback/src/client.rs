//! Snapshot source.
//!
//! The polling path and the initial load fetch the full metrics snapshot
//! through `SnapshotSource`, so the controller can be driven by a fake in
//! tests and by `HttpSnapshotClient` in production.

use crate::error::{FallbackError, FallbackResult};
use reqwest::Client;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Default timeout for snapshot requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed future type for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Fetches one full snapshot.
pub trait SnapshotSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, FallbackResult<Value>>;
}

/// HTTP client for the metrics snapshot endpoint.
pub struct HttpSnapshotClient {
    client: Client,
    url: String,
}

impl HttpSnapshotClient {
    pub fn new(url: impl Into<String>) -> FallbackResult<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> FallbackResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FallbackError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_snapshot(&self) -> FallbackResult<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FallbackError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FallbackError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FallbackError::Decode(format!("Failed to parse response: {e}")))?;

        if !body.is_object() {
            return Err(FallbackError::Decode(
                "snapshot response is not an object".to_string(),
            ));
        }

        debug!(url = %self.url, "Snapshot fetched");
        Ok(body)
    }
}

impl SnapshotSource for HttpSnapshotClient {
    fn fetch(&self) -> BoxFuture<'_, FallbackResult<Value>> {
        Box::pin(self.fetch_snapshot())
    }
}
