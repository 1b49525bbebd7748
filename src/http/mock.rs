//! Mock HTTP client for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{HttpClient, HttpRequest, HttpResponse, TransportError};

type MockResult = std::result::Result<HttpResponse, TransportError>;

/// Closure producing a response from the request it is answering.
type Responder = Arc<dyn Fn(&HttpRequest) -> MockResult + Send + Sync>;

/// Mock HTTP client for testing.
///
/// Allows configuring predetermined responses for specific requests without
/// making actual HTTP calls. Queued responses are consumed first, in FIFO
/// order; once a key's queue is empty its responder (if any) answers.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response(
///     "POST /api/users/batch_async",
///     Ok(HttpResponse::new(200, r#"{"successCount":1,"failureCount":0,"successRate":1.0,"results":[]}"#)),
/// );
/// ```
#[derive(Clone)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    responders: Arc<Mutex<HashMap<String, Responder>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait before completing.
enum MockResponse {
    /// Immediate response
    Immediate(MockResult),
    /// Response that completes after a fixed delay
    Delayed { response: MockResult, delay: Duration },
    /// Response that waits for a trigger signal before completing
    Triggered {
        response: MockResult,
        trigger: oneshot::Receiver<()>,
    },
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub endpoint: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout_ms: u64,
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            responders: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a predetermined response for a specific method and path.
    ///
    /// The key is formatted as "{method} {path}". Multiple responses can be
    /// added for the same key - they will be returned in FIFO order.
    pub fn add_response(&self, key: &str, response: MockResult) {
        self.push(key, MockResponse::Immediate(response));
    }

    /// Add a response that is returned after `delay`.
    pub fn add_delayed_response(&self, key: &str, delay: Duration, response: MockResult) {
        self.push(key, MockResponse::Delayed { response, delay });
    }

    /// Add a response that will wait for a manual trigger before completing.
    ///
    /// Returns a sender that when triggered (by sending `()` or dropping) will
    /// cause the HTTP request to complete with the given response.
    pub fn add_response_with_trigger(&self, key: &str, response: MockResult) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.push(
            key,
            MockResponse::Triggered {
                response,
                trigger: rx,
            },
        );
        tx
    }

    /// Answer every request for `key` (once its queue is drained) with `responder`.
    pub fn set_responder<F>(&self, key: &str, responder: F)
    where
        F: Fn(&HttpRequest) -> MockResult + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .insert(key.to_string(), Arc::new(responder));
    }

    fn push(&self, key: &str, response: MockResponse) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(response);
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Get all calls made with the given "{method} {path}" key.
    pub fn calls_for(&self, key: &str) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| format!("{} {}", c.method, c.path) == key)
            .cloned()
            .collect()
    }

    /// Clear all recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get the number of requests currently in-flight (executing).
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &HttpRequest, timeout_ms: u64) -> MockResult {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        // Decrement even if cancelled/panicked
        let in_flight = self.in_flight.clone();
        let _guard = scopeguard::guard((), move |_| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        self.calls.lock().push(MockCall {
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            path: request.path.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            timeout_ms,
        });

        let key = format!("{} {}", request.method, request.path);
        let queued = {
            let mut responses = self.responses.lock();
            responses
                .get_mut(&key)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };

        match queued {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Delayed { response, delay }) => {
                tokio::time::sleep(delay).await;
                response
            }
            Some(MockResponse::Triggered { response, trigger }) => {
                // Proceed whether the trigger fired or was dropped
                let _ = trigger.await;
                response
            }
            None => {
                let responder = self.responders.lock().get(&key).cloned();
                match responder {
                    Some(responder) => responder(request),
                    None => Err(TransportError::Other(format!(
                        "No mock response configured for {}",
                        key
                    ))),
                }
            }
        }
    }
}
