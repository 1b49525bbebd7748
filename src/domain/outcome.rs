//! Classified result of dispatching one chunk.

use serde::Serialize;

use super::report::ChunkReport;

/// What happened to a chunk, classified once at the network boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Downstream responded with a decodable body.
    Success { status: u16, report: ChunkReport },
    /// Downstream responded but the body could not be decoded.
    DecodeFailure { status: u16, error: String },
    /// No response within the window, or the connection closed prematurely.
    Timeout { error: String },
    /// A connection could not be established.
    ConnectionError { error: String },
    /// Downstream answered with a non-success status.
    UpstreamError {
        status: u16,
        body: String,
        /// True when the status was retryable and every attempt was used.
        exhausted: bool,
    },
    /// The principal is not allowed to run batch creation.
    Forbidden,
    /// Dispatch of the chunk (or the batch) failed for a reason outside the
    /// network taxonomy, e.g. a panic while processing.
    Internal { error: String },
}

impl OutcomeKind {
    /// HTTP-equivalent status of this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            OutcomeKind::Success { status, .. } => *status,
            OutcomeKind::DecodeFailure { .. } => 500,
            OutcomeKind::Timeout { .. } => 408,
            OutcomeKind::ConnectionError { .. } => 408,
            OutcomeKind::UpstreamError { status, .. } => *status,
            OutcomeKind::Forbidden => 403,
            OutcomeKind::Internal { .. } => 500,
        }
    }

    /// Short, low-cardinality label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Success { .. } => "success",
            OutcomeKind::DecodeFailure { .. } => "decode_failure",
            OutcomeKind::Timeout { .. } => "timeout",
            OutcomeKind::ConnectionError { .. } => "connection_error",
            OutcomeKind::UpstreamError { .. } => "upstream_error",
            OutcomeKind::Forbidden => "forbidden",
            OutcomeKind::Internal { .. } => "internal",
        }
    }
}

/// Outcome of one chunk dispatch (or of the whole batch when the gate denies).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkOutcome {
    /// Position of the chunk in the split; `None` when the outcome covers the
    /// whole batch.
    pub chunk_index: Option<usize>,
    /// Number of creation requests this outcome covers.
    pub request_count: usize,
    /// Network attempts started (0 when nothing was sent). Kept even when
    /// the dispatch panicked partway.
    pub attempts: u32,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl ChunkOutcome {
    pub fn forbidden(request_count: usize) -> Self {
        Self {
            chunk_index: None,
            request_count,
            attempts: 0,
            kind: OutcomeKind::Forbidden,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// A `Success` with a 2xx downstream status.
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success { status, .. } if (200..300).contains(&status))
    }

    /// A terminal state equivalent to a 5xx.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code())
    }

    pub fn report(&self) -> Option<&ChunkReport> {
        match &self.kind {
            OutcomeKind::Success { report, .. } => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind) -> ChunkOutcome {
        ChunkOutcome {
            chunk_index: Some(0),
            request_count: 4,
            attempts: 1,
            kind,
        }
    }

    #[test]
    fn test_status_equivalents() {
        assert_eq!(outcome(OutcomeKind::Timeout { error: "t".into() }).status_code(), 408);
        assert_eq!(
            outcome(OutcomeKind::ConnectionError { error: "c".into() }).status_code(),
            408
        );
        assert_eq!(
            outcome(OutcomeKind::DecodeFailure {
                status: 200,
                error: "d".into()
            })
            .status_code(),
            500
        );
        assert_eq!(ChunkOutcome::forbidden(10).status_code(), 403);
    }

    #[test]
    fn test_server_error_classification() {
        let upstream = outcome(OutcomeKind::UpstreamError {
            status: 503,
            body: String::new(),
            exhausted: true,
        });
        assert!(upstream.is_server_error());
        assert!(!upstream.is_success());

        let not_found = outcome(OutcomeKind::UpstreamError {
            status: 404,
            body: String::new(),
            exhausted: false,
        });
        assert!(!not_found.is_server_error());

        let internal = outcome(OutcomeKind::Internal {
            error: "panic".into(),
        });
        assert!(internal.is_server_error());
    }

    #[test]
    fn test_success_requires_2xx() {
        let report = ChunkReport {
            success_count: 1,
            failure_count: 0,
            success_rate: 1.0,
            results: vec![],
        };
        let ok = outcome(OutcomeKind::Success {
            status: 201,
            report: report.clone(),
        });
        assert!(ok.is_success());
        assert!(ok.report().is_some());

        let odd = outcome(OutcomeKind::Success {
            status: 299,
            report,
        });
        assert!(odd.is_success());
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(ChunkOutcome::forbidden(3)).unwrap();
        assert_eq!(json["kind"], "forbidden");
        assert_eq!(json["request_count"], 3);
        assert!(json["chunk_index"].is_null());
    }
}
