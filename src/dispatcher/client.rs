//! Resilient client: one chunk in, one classified outcome out.
//!
//! Wraps an [`HttpClient`] with a per-attempt timeout and a [`RetryPolicy`].
//! Every terminal state, whether a non-retryable failure or an exhausted
//! retry budget, becomes an [`OutcomeKind`]; nothing escapes as an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use metrics::counter;

use super::profile::DispatchProfile;
use super::retry::{FailureClass, GiveUpReason, RetryDecision, RetryPolicy};
use crate::domain::{Chunk, ChunkOutcome, ChunkReport, OutcomeKind};
use crate::http::{CURRENT_USER_HEADER, HttpClient, HttpRequest, TransportError};

/// Result of a single attempt.
enum Attempt {
    /// Terminal success, no retry needed
    Done(OutcomeKind),
    /// Failed; `outcome` is what the chunk ends with if this is the last attempt
    Failed {
        class: FailureClass,
        outcome: OutcomeKind,
    },
}

/// Map a transport error onto a failure class and its terminal outcome.
fn classify_transport(error: TransportError) -> (FailureClass, OutcomeKind) {
    match error {
        TransportError::Timeout(e) => (FailureClass::Timeout, OutcomeKind::Timeout { error: e }),
        TransportError::PrematureClose(e) => (
            FailureClass::PrematureClose,
            OutcomeKind::Timeout { error: e },
        ),
        TransportError::Connect(e) => (
            FailureClass::Connect,
            OutcomeKind::ConnectionError { error: e },
        ),
        TransportError::Builder(e) | TransportError::Other(e) => {
            (FailureClass::Internal, OutcomeKind::Internal { error: e })
        }
    }
}

/// HTTP client with timeout, conditional retry and outcome classification.
#[derive(Clone)]
pub struct ResilientClient<H: HttpClient> {
    http_client: H,
    endpoint: String,
    policy: Arc<RetryPolicy>,
}

impl<H: HttpClient> ResilientClient<H> {
    pub fn new(http_client: H, endpoint: impl Into<String>, policy: Arc<RetryPolicy>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `chunk` to the profile's path with the principal as correlation header.
    ///
    /// Attempts are strictly sequential; at most `policy.max_attempts()` are made.
    pub async fn dispatch(
        &self,
        chunk: &Chunk,
        profile: &DispatchProfile,
        principal: &str,
    ) -> ChunkOutcome {
        self.dispatch_counted(chunk, profile, principal, &AtomicU32::new(0))
            .await
    }

    /// Like [`dispatch`](Self::dispatch), also counting every attempt in
    /// `sent` as it starts, so the count survives if the dispatch unwinds.
    #[tracing::instrument(skip(self, chunk, profile, sent), fields(chunk_index = chunk.index, profile = %profile.name, size = chunk.len()))]
    pub async fn dispatch_counted(
        &self,
        chunk: &Chunk,
        profile: &DispatchProfile,
        principal: &str,
        sent: &AtomicU32,
    ) -> ChunkOutcome {
        let body = match serde_json::to_string(&chunk.requests) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize chunk");
                return ChunkOutcome {
                    chunk_index: Some(chunk.index),
                    request_count: chunk.len(),
                    attempts: 0,
                    kind: OutcomeKind::Internal {
                        error: format!("failed to serialize chunk: {}", e),
                    },
                };
            }
        };

        let request = HttpRequest::post_json(self.endpoint.clone(), profile.path.clone(), body)
            .with_header(CURRENT_USER_HEADER, principal);

        let mut attempts = 0u32;
        let kind = loop {
            attempts += 1;
            sent.fetch_add(1, Ordering::Relaxed);
            counter!("volley_dispatch_attempts_total", "profile" => profile.name.clone())
                .increment(1);

            let (class, outcome) = match self.attempt(&request, chunk, profile).await {
                Attempt::Done(kind) => break kind,
                Attempt::Failed { class, outcome } => (class, outcome),
            };

            match self.policy.decide(&class, attempts) {
                RetryDecision::Retry { backoff } => {
                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts(),
                        failure = class.as_str(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Chunk dispatch failed with retryable error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                RetryDecision::GiveUp(reason) => {
                    let exhausted = reason == GiveUpReason::Exhausted;
                    tracing::error!(
                        attempt = attempts,
                        failure = class.as_str(),
                        exhausted,
                        "Chunk dispatch failed permanently"
                    );
                    break match outcome {
                        OutcomeKind::UpstreamError { status, body, .. } => {
                            OutcomeKind::UpstreamError {
                                status,
                                body,
                                exhausted,
                            }
                        }
                        other => other,
                    };
                }
            }
        };

        ChunkOutcome {
            chunk_index: Some(chunk.index),
            request_count: chunk.len(),
            attempts,
            kind,
        }
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        chunk: &Chunk,
        profile: &DispatchProfile,
    ) -> Attempt {
        let window = Duration::from_millis(profile.timeout_ms);
        let result =
            tokio::time::timeout(window, self.http_client.execute(request, profile.timeout_ms))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Timeout(format!(
                        "no response within {}ms",
                        profile.timeout_ms
                    )))
                });

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Attempt failed at transport level");
                let (class, outcome) = classify_transport(e);
                return Attempt::Failed { class, outcome };
            }
        };

        tracing::debug!(status = response.status, "Downstream responded");

        if response.is_success() {
            return match ChunkReport::decode(profile.shape, &response.body, chunk.len()) {
                Ok(report) => Attempt::Done(OutcomeKind::Success {
                    status: response.status,
                    report,
                }),
                Err(error) => {
                    tracing::warn!(status = response.status, error = %error, "Failed to decode downstream response");
                    Attempt::Failed {
                        class: FailureClass::Decode,
                        outcome: OutcomeKind::DecodeFailure {
                            status: response.status,
                            error,
                        },
                    }
                }
            };
        }

        let class = if response.is_server_error() {
            FailureClass::ServerError {
                status: response.status,
            }
        } else {
            FailureClass::ClientError {
                status: response.status,
            }
        };

        Attempt::Failed {
            class,
            outcome: OutcomeKind::UpstreamError {
                status: response.status,
                body: response.body,
                exhausted: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreationRequest, ResponseShape};
    use crate::dispatcher::retry::default_should_retry;
    use crate::http::{HttpResponse, MockHttpClient};

    const KEY: &str = "POST /api/users/batch_async";

    fn chunk(size: usize) -> Chunk {
        Chunk {
            index: 2,
            offset: 0,
            requests: (0..size)
                .map(|i| CreationRequest::new(format!("u{i}"), "pw", format!("u{i}@x.io")))
                .collect(),
        }
    }

    fn profile(timeout_ms: u64) -> DispatchProfile {
        DispatchProfile::new(
            "summary",
            "/api/users/batch_async",
            timeout_ms,
            ResponseShape::Summary,
        )
    }

    fn client(mock: &MockHttpClient) -> ResilientClient<MockHttpClient> {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_ms: 1,
            backoff_factor: 2,
            max_backoff_ms: 10,
            should_retry: Arc::new(default_should_retry),
        };
        ResilientClient::new(mock.clone(), "http://users", Arc::new(policy))
    }

    fn ok_body(success: u32, failure: u32) -> String {
        format!(r#"{{"successCount":{success},"failureCount":{failure},"successRate":1.0,"results":[]}}"#)
    }

    #[test_log::test(tokio::test)]
    async fn test_success_on_first_attempt() {
        let mock = MockHttpClient::new();
        mock.add_response(KEY, Ok(HttpResponse::new(200, ok_body(3, 0))));

        let outcome = client(&mock).dispatch(&chunk(3), &profile(1000), "alice").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.chunk_index, Some(2));
        assert_eq!(outcome.request_count, 3);

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].endpoint, "http://users");
        assert_eq!(calls[0].timeout_ms, 1000);
        assert!(
            calls[0]
                .headers
                .contains(&(CURRENT_USER_HEADER.to_string(), "alice".to_string()))
        );
        let sent: Vec<CreationRequest> = serde_json::from_str(&calls[0].body).unwrap();
        assert_eq!(sent, chunk(3).requests);
    }

    #[test_log::test(tokio::test)]
    async fn test_server_error_is_retried_to_exhaustion() {
        let mock = MockHttpClient::new();
        mock.set_responder(KEY, |_| Ok(HttpResponse::new(503, "down")));

        let outcome = client(&mock).dispatch(&chunk(2), &profile(1000), "alice").await;

        assert_eq!(mock.call_count(), 4);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(
            outcome.kind,
            OutcomeKind::UpstreamError {
                status: 503,
                body: "down".to_string(),
                exhausted: true,
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_client_error_is_not_retried() {
        let mock = MockHttpClient::new();
        mock.set_responder(KEY, |_| Ok(HttpResponse::new(422, "invalid")));

        let outcome = client(&mock).dispatch(&chunk(2), &profile(1000), "alice").await;

        assert_eq!(mock.call_count(), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.kind,
            OutcomeKind::UpstreamError {
                status: 422,
                exhausted: false,
                ..
            }
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_retry_recovers_after_transient_failures() {
        let mock = MockHttpClient::new();
        mock.add_response(KEY, Ok(HttpResponse::new(500, "boom")));
        mock.add_response(KEY, Err(TransportError::PrematureClose("reset".into())));
        mock.add_response(KEY, Ok(HttpResponse::new(200, ok_body(2, 0))));

        let outcome = client(&mock).dispatch(&chunk(2), &profile(1000), "alice").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_slow_response_times_out_and_is_retried() {
        let mock = MockHttpClient::new();
        mock.add_delayed_response(
            KEY,
            Duration::from_millis(500),
            Ok(HttpResponse::new(200, ok_body(1, 0))),
        );
        mock.add_response(KEY, Ok(HttpResponse::new(200, ok_body(1, 0))));

        let outcome = client(&mock).dispatch(&chunk(1), &profile(20), "alice").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_persistent_timeout_ends_as_timeout() {
        let mock = MockHttpClient::new();
        mock.set_responder(KEY, |_| Err(TransportError::Timeout("read timeout".into())));

        let outcome = client(&mock).dispatch(&chunk(1), &profile(1000), "alice").await;

        assert_eq!(outcome.attempts, 4);
        assert!(matches!(outcome.kind, OutcomeKind::Timeout { .. }));
        assert_eq!(outcome.status_code(), 408);
    }

    #[test_log::test(tokio::test)]
    async fn test_connection_error_is_not_retried() {
        let mock = MockHttpClient::new();
        mock.set_responder(KEY, |_| Err(TransportError::Connect("refused".into())));

        let outcome = client(&mock).dispatch(&chunk(1), &profile(1000), "alice").await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.kind, OutcomeKind::ConnectionError { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_undecodable_body_is_not_retried() {
        let mock = MockHttpClient::new();
        mock.set_responder(KEY, |_| Ok(HttpResponse::new(200, "<html/>")));

        let outcome = client(&mock).dispatch(&chunk(1), &profile(1000), "alice").await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.kind,
            OutcomeKind::DecodeFailure { status: 200, .. }
        ));
        assert!(outcome.is_server_error());
    }
}
