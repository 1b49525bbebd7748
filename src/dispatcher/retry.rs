//! Retry policy for chunk dispatch.
//!
//! A policy is a pure decision over a classified failure and the number of
//! attempts already made. The resilient client evaluates it after every
//! failed attempt and either sleeps for the computed backoff or stops.
//!
//! ```text
//! attempt ──fail──> decide(class, attempts)
//!                     ├── Retry { backoff }  ──sleep──> attempt
//!                     ├── GiveUp(NotRetryable)          (4xx, decode, connect)
//!                     └── GiveUp(Exhausted)             (max attempts used)
//! ```
//!
//! Backoff grows as `backoff_ms * backoff_factor ^ retry_index`, capped at
//! `max_backoff_ms`.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use super::config::DispatcherConfig;

/// Classified failure of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Downstream answered 5xx
    ServerError { status: u16 },
    /// Downstream answered with any other non-2xx status
    ClientError { status: u16 },
    /// No response within the attempt window
    Timeout,
    /// Connection closed before the response completed
    PrematureClose,
    /// Connection could not be established
    Connect,
    /// Response body did not match the expected shape
    Decode,
    /// Request could not be built or the transport failed otherwise
    Internal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::ServerError { .. } => "server_error",
            FailureClass::ClientError { .. } => "client_error",
            FailureClass::Timeout => "timeout",
            FailureClass::PrematureClose => "premature_close",
            FailureClass::Connect => "connect",
            FailureClass::Decode => "decode",
            FailureClass::Internal => "internal",
        }
    }
}

/// Predicate deciding whether a failure may be retried.
///
/// Receives the failure and the number of attempts made so far.
pub type ShouldRetryFn = Arc<dyn Fn(&FailureClass, u32) -> bool + Send + Sync>;

/// Default retry predicate: retry server errors (5xx), timeouts and premature closes.
pub fn default_should_retry(failure: &FailureClass, _attempts: u32) -> bool {
    matches!(
        failure,
        FailureClass::ServerError { .. } | FailureClass::Timeout | FailureClass::PrematureClose
    )
}

/// Why the client stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    NotRetryable,
    Exhausted,
}

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { backoff: Duration },
    GiveUp(GiveUpReason),
}

/// Retry limits and backoff shape, shared read-only by all dispatches.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_factor: u64,
    pub max_backoff_ms: u64,
    pub should_retry: ShouldRetryFn,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .finish_non_exhaustive()
    }
}

impl From<&DispatcherConfig> for RetryPolicy {
    fn from(config: &DispatcherConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
            backoff_factor: config.backoff_factor,
            max_backoff_ms: config.max_backoff_ms,
            should_retry: config.should_retry.clone(),
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed: the first one plus `max_retries`.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry_index` (0-based).
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry_index));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }

    /// Decide what to do after `attempts` attempts, the last of which failed with `failure`.
    pub fn decide(&self, failure: &FailureClass, attempts: u32) -> RetryDecision {
        if !(self.should_retry)(failure, attempts) {
            counter!("volley_retry_denied_total", "reason" => "not_retryable").increment(1);
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }

        if attempts >= self.max_attempts() {
            counter!("volley_retry_denied_total", "reason" => "max_retries").increment(1);
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }

        RetryDecision::Retry {
            backoff: self.backoff(attempts.saturating_sub(1)),
        }
    }
}
