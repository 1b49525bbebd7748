//! Dispatch profiles: which downstream path, how long to wait, what to expect back.

use serde::{Deserialize, Serialize};

use crate::domain::ResponseShape;

/// A downstream call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchProfile {
    /// Low-cardinality name used in logs and metrics
    pub name: String,
    /// Path on the downstream service, starting with '/'
    pub path: String,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    pub shape: ResponseShape,
}

impl DispatchProfile {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        timeout_ms: u64,
        shape: ResponseShape,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout_ms,
            shape,
        }
    }
}
