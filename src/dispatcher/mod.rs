//! Dispatcher: permission gate, chunking and bounded fan-out.
//!
//! A run authorizes the principal once, splits the batch, and dispatches
//! every chunk through the [`ResilientClient`] with at most `fanout` chunks in
//! flight. Outcomes are published on a stream as they complete, so their
//! order is completion order; each carries its chunk index so the caller can
//! restore submission order.
//!
//! ```text
//! run ──authorize──> Denied ──> [Forbidden]
//!          │
//!          └──> Allowed ──split──> chunk 0..n ──semaphore(K)──> ResilientClient ──> outcome stream
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use futures::{FutureExt, Stream, StreamExt};
use metrics::counter;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::{Batch, BatchResult, ChunkOutcome, OutcomeKind, split};
use crate::error::Result;
use crate::gate::{Authorization, PermissionGate};
use crate::http::HttpClient;
#[cfg(feature = "metrics")]
use crate::metrics::VolleyMetrics;

pub mod client;
pub mod config;
pub mod profile;
pub mod retry;

pub use client::ResilientClient;
pub use config::DispatcherConfig;
pub use profile::DispatchProfile;
pub use retry::{
    FailureClass, GiveUpReason, RetryDecision, RetryPolicy, ShouldRetryFn, default_should_retry,
};

/// Lazy, finite stream of chunk outcomes in completion order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = ChunkOutcome> + Send>>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drives batches through the permission gate and the resilient client.
pub struct Dispatcher<H>
where
    H: HttpClient,
{
    config: Arc<DispatcherConfig>,
    gate: PermissionGate<H>,
    client: ResilientClient<H>,
    chunks_in_flight: Arc<AtomicUsize>,
    #[cfg(feature = "metrics")]
    metrics: Option<VolleyMetrics>,
}

impl<H> Dispatcher<H>
where
    H: HttpClient + 'static,
{
    /// Create a new dispatcher. Fails if the configuration is invalid.
    pub fn new(http_client: H, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let policy = Arc::new(RetryPolicy::from(&config));
        let gate = PermissionGate::new(
            http_client.clone(),
            config.authority_url.clone(),
            config.permission_timeout_ms,
        );
        let client = ResilientClient::new(http_client, config.downstream_url.clone(), policy);

        Ok(Self {
            config: Arc::new(config),
            gate,
            client,
            chunks_in_flight: Arc::new(AtomicUsize::new(0)),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Attach Prometheus metrics, updated for every chunk and permission check.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: VolleyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Number of chunk dispatches currently holding a concurrency slot.
    pub fn chunks_in_flight(&self) -> usize {
        self.chunks_in_flight.load(Ordering::Relaxed)
    }

    /// Start a run and return its outcomes as they complete.
    ///
    /// Produces exactly one `Forbidden` outcome if the principal is denied, and
    /// otherwise exactly one outcome per chunk. The stream is not restartable;
    /// a fresh run re-authorizes and re-chunks.
    pub fn run(
        &self,
        batch: Batch,
        principal: impl Into<String>,
        profile: DispatchProfile,
    ) -> OutcomeStream {
        let principal: Arc<str> = Arc::from(principal.into());
        let fanout = self.config.fanout;
        let (tx, rx) = mpsc::channel(fanout);

        let gate = self.gate.clone();
        let client = self.client.clone();
        let chunks_in_flight = self.chunks_in_flight.clone();
        let profile = Arc::new(profile);
        #[cfg(feature = "metrics")]
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let batch_len = batch.len();
            tracing::info!(
                principal = %principal,
                profile = %profile.name,
                batch_len,
                "Starting batch dispatch"
            );

            let authorization = AssertUnwindSafe(gate.authorize(&principal))
                .catch_unwind()
                .await;

            #[cfg(feature = "metrics")]
            if let (Some(metrics), Ok(authorization)) = (&metrics, &authorization) {
                metrics.record_permission(authorization.is_allowed());
            }

            match authorization {
                Ok(Authorization::Allowed) => {}
                Ok(Authorization::Denied(reason)) => {
                    tracing::warn!(principal = %principal, reason = %reason, "Batch dispatch forbidden");
                    let _ = tx.send(ChunkOutcome::forbidden(batch_len)).await;
                    return;
                }
                Err(payload) => {
                    let error = panic_message(payload);
                    tracing::error!(principal = %principal, error = %error, "Permission check panicked");
                    let _ = tx
                        .send(ChunkOutcome {
                            chunk_index: None,
                            request_count: batch_len,
                            attempts: 0,
                            kind: OutcomeKind::Internal { error },
                        })
                        .await;
                    return;
                }
            }

            let chunks = split(&batch, fanout);
            tracing::info!(chunks = chunks.len(), fanout, "Split batch into chunks");

            let semaphore = Arc::new(Semaphore::new(fanout));
            let mut join_set: JoinSet<()> = JoinSet::new();

            for chunk in chunks {
                let semaphore = semaphore.clone();
                let client = client.clone();
                let principal = principal.clone();
                let profile = profile.clone();
                let tx = tx.clone();
                let chunks_in_flight = chunks_in_flight.clone();
                #[cfg(feature = "metrics")]
                let metrics = metrics.clone();

                join_set.spawn(async move {
                    let chunk_index = chunk.index;
                    let request_count = chunk.len();

                    // Permit is held for the duration of this dispatch
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            let _ = tx
                                .send(ChunkOutcome {
                                    chunk_index: Some(chunk_index),
                                    request_count,
                                    attempts: 0,
                                    kind: OutcomeKind::Internal {
                                        error: format!("concurrency limiter closed: {}", e),
                                    },
                                })
                                .await;
                            return;
                        }
                    };

                    let in_flight = chunks_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
                    #[cfg(feature = "metrics")]
                    if let Some(metrics) = &metrics {
                        metrics.set_chunks_in_flight(&profile.name, in_flight);
                    }
                    tracing::debug!(chunk_index, request_count, in_flight, "Acquired permit, dispatching chunk");

                    let _guard = scopeguard::guard((), |_| {
                        chunks_in_flight.fetch_sub(1, Ordering::Relaxed);
                    });

                    let started = Instant::now();
                    let sent = AtomicU32::new(0);
                    let outcome = match AssertUnwindSafe(
                        client.dispatch_counted(&chunk, &profile, &principal, &sent),
                    )
                    .catch_unwind()
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let error = panic_message(payload);
                            let attempts = sent.load(Ordering::Relaxed);
                            tracing::error!(chunk_index, attempts, error = %error, "Chunk dispatch panicked");
                            ChunkOutcome {
                                chunk_index: Some(chunk_index),
                                request_count,
                                attempts,
                                kind: OutcomeKind::Internal { error },
                            }
                        }
                    };

                    counter!(
                        "volley_chunk_outcomes_total",
                        "profile" => profile.name.clone(),
                        "outcome" => outcome.kind.label()
                    )
                    .increment(1);
                    #[cfg(feature = "metrics")]
                    if let Some(metrics) = &metrics {
                        metrics.record_chunk(
                            &profile.name,
                            outcome.kind.label(),
                            outcome.attempts.saturating_sub(1),
                            started.elapsed(),
                        );
                    }

                    tracing::info!(
                        chunk_index,
                        outcome = outcome.kind.label(),
                        status = outcome.status_code(),
                        attempts = outcome.attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Chunk dispatch finished"
                    );

                    // Receiver may be gone; the dispatch still ran to completion
                    let _ = tx.send(outcome).await;
                });
            }

            // The stream ends once every chunk task has dropped its sender
            drop(tx);

            while let Some(result) = join_set.join_next().await {
                if let Err(join_error) = result {
                    tracing::error!(error = %join_error, "Chunk task failed");
                }
            }

            tracing::info!(principal = %principal, profile = %profile.name, "Batch dispatch complete");
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Run and collect every outcome, in completion order.
    pub async fn run_to_list(
        &self,
        batch: Batch,
        principal: impl Into<String>,
        profile: DispatchProfile,
    ) -> Vec<ChunkOutcome> {
        self.run(batch, principal, profile).collect().await
    }

    /// Run and reduce the outcomes into a [`BatchResult`].
    pub async fn run_to_result(
        &self,
        batch: Batch,
        principal: impl Into<String>,
        profile: DispatchProfile,
    ) -> BatchResult {
        BatchResult::from_outcomes(self.run_to_list(batch, principal, profile).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CreationRequest;
    use crate::http::{HttpResponse, MockHttpClient};

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            downstream_url: "http://users".to_string(),
            authority_url: "http://users/api/users".to_string(),
            backoff_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        }
    }

    fn batch(n: usize) -> Batch {
        (0..n)
            .map(|i| CreationRequest::new(format!("u{i}"), "pw", format!("u{i}@x.io")))
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_batch_dispatches_nothing() {
        let mock = MockHttpClient::new();
        mock.add_response("GET /permission/alice", Ok(HttpResponse::new(200, "ADMIN")));
        let dispatcher = Dispatcher::new(mock.clone(), config()).unwrap();
        let profile = dispatcher.config().summary_profile();

        let result = dispatcher.run_to_result(vec![], "alice", profile).await;

        assert!(result.outcomes.is_empty());
        assert_eq!(result.success_count, 0);
        assert_eq!(result.failure_count, 0);
        assert_eq!(mock.call_count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_gate_panic_yields_single_internal_outcome() {
        let mock = MockHttpClient::new();
        mock.set_responder("GET /permission/alice", |_| panic!("authority exploded"));
        let dispatcher = Dispatcher::new(mock.clone(), config()).unwrap();
        let profile = dispatcher.config().summary_profile();

        let outcomes = dispatcher.run_to_list(batch(7), "alice", profile).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].chunk_index, None);
        assert_eq!(outcomes[0].request_count, 7);
        assert!(matches!(
            &outcomes[0].kind,
            OutcomeKind::Internal { error } if error.contains("authority exploded")
        ));
        assert_eq!(mock.calls_for("POST /api/users/batch_async").len(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DispatcherConfig {
            fanout: 0,
            ..config()
        };
        assert!(Dispatcher::new(MockHttpClient::new(), config).is_err());
    }
}
