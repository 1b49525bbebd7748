//! Creation requests and batches.

use serde::{Deserialize, Serialize};

/// A single "create user" request forwarded to the downstream service.
///
/// Carries no identity: the downstream service assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreationRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl CreationRequest {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: email.into(),
        }
    }
}

/// An ordered batch of creation requests, owned by one invocation.
pub type Batch = Vec<CreationRequest>;
