//! Reducing per-chunk outcomes into a batch result.

use serde::Serialize;

use super::outcome::ChunkOutcome;

/// More than this many 5xx-equivalent chunks makes the batch unavailable.
const SERVER_ERROR_LIMIT: usize = 3;
/// Exactly this many successful chunks yields partial content; fewer is a bad request.
const PARTIAL_SUCCESS_COUNT: usize = 3;

/// Overall status derived from chunk counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Ok,
    PartialContent,
    BadRequest,
    ServiceUnavailable,
}

impl OverallStatus {
    /// Fixed-bucket status policy. The server-error check runs first.
    pub fn from_counts(success_count: usize, error_count: usize) -> Self {
        if error_count > SERVER_ERROR_LIMIT {
            OverallStatus::ServiceUnavailable
        } else if success_count < PARTIAL_SUCCESS_COUNT {
            OverallStatus::BadRequest
        } else if success_count == PARTIAL_SUCCESS_COUNT {
            OverallStatus::PartialContent
        } else {
            OverallStatus::Ok
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            OverallStatus::Ok => 200,
            OverallStatus::PartialContent => 206,
            OverallStatus::BadRequest => 400,
            OverallStatus::ServiceUnavailable => 503,
        }
    }
}

/// Users created/failed, summed over chunk reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserTally {
    pub created: usize,
    pub failed: usize,
}

/// Aggregated result of one batch invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub overall_status: OverallStatus,
    /// Chunks that succeeded with a 2xx status
    pub success_count: usize,
    /// Chunks that did not succeed
    pub failure_count: usize,
    /// Chunks that ended in a 5xx-equivalent state
    pub error_count: usize,
    /// `success_count` over all outcomes; 0 for an empty batch
    pub success_rate: f32,
    pub users: UserTally,
    /// Outcomes in the order they completed
    pub outcomes: Vec<ChunkOutcome>,
}

impl BatchResult {
    /// Reduce outcomes (in any order) into a batch result.
    pub fn from_outcomes(outcomes: Vec<ChunkOutcome>) -> Self {
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let error_count = outcomes.iter().filter(|o| o.is_server_error()).count();
        let failure_count = outcomes.len() - success_count;
        let success_rate = if outcomes.is_empty() {
            0.0
        } else {
            success_count as f32 / outcomes.len() as f32
        };

        let users = outcomes
            .iter()
            .fold(UserTally::default(), |mut tally, outcome| {
                match outcome.report() {
                    Some(report) => {
                        tally.created += report.success_count as usize;
                        tally.failed += report.failure_count as usize;
                    }
                    None => tally.failed += outcome.request_count,
                }
                tally
            });

        Self {
            overall_status: OverallStatus::from_counts(success_count, error_count),
            success_count,
            failure_count,
            error_count,
            success_rate,
            users,
            outcomes,
        }
    }

    /// Outcomes re-sorted into submission (chunk) order. Whole-batch outcomes
    /// sort first.
    pub fn sorted_outcomes(&self) -> Vec<ChunkOutcome> {
        let mut sorted = self.outcomes.clone();
        sorted.sort_by_key(|o| o.chunk_index);
        sorted
    }
}
