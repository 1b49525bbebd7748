//! HTTP client abstraction for making requests.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request execution,
//! enabling testability with mock implementations. Transport failures are
//! classified here, at the boundary where the network call is made, into
//! [`TransportError`] so that callers only ever see a typed failure.

use async_trait::async_trait;
use thiserror::Error;

mod mock;
mod reqwest_client;

pub use mock::{MockCall, MockHttpClient};
pub use reqwest_client::ReqwestHttpClient;

/// Header carrying the acting principal on every downstream call.
pub const CURRENT_USER_HEADER: &str = "X-Current-User";

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method, e.g. "GET" or "POST"
    pub method: String,
    /// Base URL of the target service, without trailing slash
    pub endpoint: String,
    /// Path appended to the endpoint, starting with '/'
    pub path: String,
    /// Extra headers as (name, value) pairs
    pub headers: Vec<(String, String)>,
    /// Request body (sent as JSON when non-empty)
    pub body: String,
}

impl HttpRequest {
    pub fn get(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            endpoint: endpoint.into(),
            path: path.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn post_json(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            method: "POST".to_string(),
            endpoint: endpoint.into(),
            path: path.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Full URL of this request.
    pub fn url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), self.path)
    }

    /// Value of the first header matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// A transport-level failure: no usable HTTP response was obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the attempt window
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Could not establish a connection
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connection closed before the response was complete
    #[error("connection closed prematurely: {0}")]
    PrematureClose(String),

    /// The request could not be constructed (bad URL, header, method)
    #[error("failed to build request: {0}")]
    Builder(String),

    /// Anything else the transport reported
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            TransportError::Timeout(message)
        } else if e.is_connect() {
            TransportError::Connect(message)
        } else if e.is_builder() {
            TransportError::Builder(message)
        } else if e.is_body() || e.is_request() || e.is_decode() {
            TransportError::PrematureClose(message)
        } else {
            TransportError::Other(message)
        }
    }
}

/// Trait for executing HTTP requests.
///
/// This abstraction allows for different implementations (production vs. testing)
/// and makes the dispatch logic testable without making real HTTP calls.
///
/// # Example
/// ```ignore
/// let client = ReqwestHttpClient::new();
/// let request = HttpRequest::get("http://localhost:8082/api/users", "/permission/alice");
/// let response = client.execute(&request, 5000).await?;
/// println!("Status: {}, Body: {}", response.status, response.body);
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// Execute an HTTP request.
    ///
    /// # Arguments
    /// * `request` - Method, endpoint, path, headers and body
    /// * `timeout_ms` - Request timeout in milliseconds
    ///
    /// Any HTTP status, including 4xx and 5xx, is an `Ok` response. `Err` is
    /// reserved for failures where no complete response was received.
    async fn execute(
        &self,
        request: &HttpRequest,
        timeout_ms: u64,
    ) -> std::result::Result<HttpResponse, TransportError>;
}
