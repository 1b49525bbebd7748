//! Per-chunk reports returned by the downstream service.
//!
//! The downstream service answers in one of three body shapes depending on
//! the endpoint. All of them normalise into a [`ChunkReport`].

use serde::{Deserialize, Serialize};

/// Body shape expected from a downstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// `{successCount, failureCount, successRate, results: [..]}`
    Summary,
    /// `{successCount, failureCount, successRate, successfulUsers: [..], errorUsers: [..]}`
    Detailed,
    /// A flat list of per-user results; counts are derived from it
    PerRecord,
}

/// Result for one user as reported by the downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResult {
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl UserResult {
    /// Whether the downstream marked this user as created.
    pub fn is_success(&self) -> bool {
        ["success", "created", "ok"]
            .iter()
            .any(|s| self.status.eq_ignore_ascii_case(s))
    }
}

/// Normalised statistics for one dispatched chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkReport {
    pub success_count: u32,
    pub failure_count: u32,
    pub success_rate: f32,
    pub results: Vec<UserResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryBody {
    success_count: u32,
    failure_count: u32,
    success_rate: Option<f32>,
    #[serde(default)]
    results: Vec<UserResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailedBody {
    success_count: u32,
    failure_count: u32,
    success_rate: Option<f32>,
    #[serde(default)]
    successful_users: Vec<SuccessfulUser>,
    #[serde(default)]
    error_users: Vec<ErrorUser>,
}

#[derive(Deserialize)]
struct SuccessfulUser {
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorUser {
    username: String,
    #[serde(default, alias = "errorMessage", alias = "message")]
    error: Option<String>,
}

fn rate(success: u32, failure: u32) -> f32 {
    let total = success + failure;
    if total == 0 {
        0.0
    } else {
        success as f32 / total as f32
    }
}

impl ChunkReport {
    /// Decode a downstream body for a chunk of `request_count` requests.
    ///
    /// Fails when the body does not match `shape`, or when it reports more
    /// outcomes than requests were sent. Reporting fewer is accepted.
    pub fn decode(
        shape: ResponseShape,
        body: &str,
        request_count: usize,
    ) -> std::result::Result<Self, String> {
        let report = match shape {
            ResponseShape::Summary => {
                let body: SummaryBody = serde_json::from_str(body).map_err(|e| e.to_string())?;
                ChunkReport {
                    success_count: body.success_count,
                    failure_count: body.failure_count,
                    success_rate: body
                        .success_rate
                        .unwrap_or_else(|| rate(body.success_count, body.failure_count)),
                    results: body.results,
                }
            }
            ResponseShape::Detailed => {
                let body: DetailedBody = serde_json::from_str(body).map_err(|e| e.to_string())?;
                let results = body
                    .successful_users
                    .into_iter()
                    .map(|u| UserResult {
                        username: u.username,
                        status: "SUCCESS".to_string(),
                        message: None,
                    })
                    .chain(body.error_users.into_iter().map(|u| UserResult {
                        username: u.username,
                        status: "ERROR".to_string(),
                        message: u.error,
                    }))
                    .collect();
                ChunkReport {
                    success_count: body.success_count,
                    failure_count: body.failure_count,
                    success_rate: body
                        .success_rate
                        .unwrap_or_else(|| rate(body.success_count, body.failure_count)),
                    results,
                }
            }
            ResponseShape::PerRecord => {
                let results: Vec<UserResult> =
                    serde_json::from_str(body).map_err(|e| e.to_string())?;
                let success_count = results.iter().filter(|r| r.is_success()).count() as u32;
                let failure_count = results.len() as u32 - success_count;
                ChunkReport {
                    success_count,
                    failure_count,
                    success_rate: rate(success_count, failure_count),
                    results,
                }
            }
        };

        let reported = report.success_count as usize + report.failure_count as usize;
        if reported > request_count {
            return Err(format!(
                "downstream reported {} outcomes for {} requests",
                reported, request_count
            ));
        }

        Ok(report)
    }
}
