//! Production HTTP client using reqwest.

use std::time::Duration;

use async_trait::async_trait;

use super::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::error::Result;

/// Production HTTP client using reqwest.
///
/// The underlying `reqwest::Client` owns a connection pool that is shared by
/// every clone, so one instance serves all concurrent chunk dispatches.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with reqwest's default pool settings.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a client with an explicit pool size and connect timeout.
    pub fn with_pool(max_idle_per_host: usize, connect_timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_idle_per_host)
            .connect_timeout(Duration::from_millis(connect_timeout_ms))
            .build()?;
        tracing::debug!(
            max_idle_per_host,
            connect_timeout_ms,
            "Built pooled HTTP client"
        );
        Ok(Self { client })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn execute(
        &self,
        request: &HttpRequest,
        timeout_ms: u64,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let url = request.url();

        tracing::debug!(url = %url, timeout_ms, "Executing HTTP request");

        let method: reqwest::Method = request.method.parse().map_err(|e| {
            tracing::error!(method = %request.method, error = %e, "Invalid HTTP method");
            TransportError::Builder(format!("invalid HTTP method '{}': {}", request.method, e))
        })?;

        let mut req = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms));

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        // Only add body and Content-Type for methods that support a body
        let method_upper = request.method.to_uppercase();
        if method_upper != "GET" && method_upper != "HEAD" && !request.body.is_empty() {
            req = req
                .header("Content-Type", "application/json")
                .body(request.body.clone());
            tracing::trace!(body_len = request.body.len(), "Added request body");
        }

        let response = req.send().await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "HTTP request failed");
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            tracing::error!(url = %url, status, error = %e, "Failed reading response body");
            TransportError::from(e)
        })?;

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}
