//! Permission gate: may this principal run a batch creation?
//!
//! One remote lookup, no retries, fails closed. Any transport failure,
//! timeout, or non-success status from the authority is a denial.

use std::time::Duration;

use metrics::counter;
use reqwest::Url;

use crate::http::{HttpClient, HttpRequest, TransportError};

/// Role marker that grants batch creation when present in the role string.
pub const ADMIN_ROLE_MARKER: &str = "ADMIN";

/// Why a principal was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The authority answered but the role string lacks the admin marker
    MissingRole { roles: String },
    /// The authority answered with a non-success status
    AuthorityStatus { status: u16 },
    /// The lookup failed at transport level (including timeouts)
    Transport(TransportError),
    /// The principal cannot be used as a lookup key
    InvalidPrincipal,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::MissingRole { roles } => {
                write!(f, "role '{}' does not contain {}", roles, ADMIN_ROLE_MARKER)
            }
            DenialReason::AuthorityStatus { status } => {
                write!(f, "permission authority returned status {}", status)
            }
            DenialReason::Transport(e) => write!(f, "permission lookup failed: {}", e),
            DenialReason::InvalidPrincipal => {
                write!(f, "principal is empty, a dot segment, or contains '/'")
            }
        }
    }
}

/// Decision of the permission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied(DenialReason),
}

/// Lookup path for `principal`, with the principal percent-encoded as one
/// path segment. `None` when the principal cannot name a single segment.
fn permission_path(principal: &str) -> Option<String> {
    if matches!(principal, "" | "." | "..") || principal.contains('/') {
        return None;
    }

    let mut url = Url::parse("http://authority/").ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push("permission")
        .push(principal);
    Some(url.path().to_string())
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allowed)
    }
}

/// Remote permission check against `{authority_url}/permission/{principal}`.
#[derive(Clone)]
pub struct PermissionGate<H: HttpClient> {
    http_client: H,
    authority_url: String,
    timeout_ms: u64,
}

impl<H: HttpClient> PermissionGate<H> {
    pub fn new(http_client: H, authority_url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            http_client,
            authority_url: authority_url.into(),
            timeout_ms,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn authorize(&self, principal: &str) -> Authorization {
        let authorization = self.lookup(principal).await;
        match &authorization {
            Authorization::Allowed => {
                counter!("volley_permission_checks_total", "decision" => "allowed").increment(1);
                tracing::info!("Principal allowed to create users");
            }
            Authorization::Denied(reason) => {
                counter!("volley_permission_checks_total", "decision" => "denied").increment(1);
                tracing::warn!(reason = %reason, "Principal denied");
            }
        }
        authorization
    }

    async fn lookup(&self, principal: &str) -> Authorization {
        let Some(path) = permission_path(principal) else {
            return Authorization::Denied(DenialReason::InvalidPrincipal);
        };

        let request = HttpRequest::get(self.authority_url.clone(), path);

        let window = Duration::from_millis(self.timeout_ms);
        let result = tokio::time::timeout(window, self.http_client.execute(&request, self.timeout_ms))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout(format!(
                    "no response within {}ms",
                    self.timeout_ms
                )))
            });

        let response = match result {
            Ok(response) => response,
            Err(e) => return Authorization::Denied(DenialReason::Transport(e)),
        };

        if !response.is_success() {
            return Authorization::Denied(DenialReason::AuthorityStatus {
                status: response.status,
            });
        }

        tracing::debug!(roles = %response.body, "Permission lookup returned roles");
        if response.body.contains(ADMIN_ROLE_MARKER) {
            Authorization::Allowed
        } else {
            Authorization::Denied(DenialReason::MissingRole {
                roles: response.body,
            })
        }
    }
}
