//! Permission-gated, bounded fan-out dispatch of user-creation batches.
//!
//! A caller submits a batch of user-creation requests on behalf of a
//! principal. The batch is authorized once against a permission authority,
//! split into at most `fanout` chunks, and each chunk is posted to the
//! downstream user service with at most `fanout` requests in flight. Each
//! chunk attempt has its own timeout and transient failures (5xx, timeouts,
//! premature closes) are retried with exponential backoff. Every chunk ends in
//! exactly one typed [`ChunkOutcome`]; outcomes are streamed in completion
//! order and reduced into a [`BatchResult`] with an overall status.
//!
//! ```ignore
//! let service = BatchService::from_config(DispatcherConfig::from_env())?;
//! let profile = service.dispatcher().config().summary_profile();
//! let result = service.create_users("alice", None, &profile).await;
//! println!("{}", result.overall_status.status_code());
//! ```

pub mod directory;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod fixtures;
pub mod gate;
pub mod http;
pub mod metrics;
pub mod service;

// Re-export commonly used types
pub use directory::{InMemoryUserDirectory, RoleRecord, UserDirectory, UserRecord};
#[cfg(feature = "postgres")]
pub use directory::PostgresUserDirectory;
pub use dispatcher::{
    DispatchProfile, Dispatcher, DispatcherConfig, FailureClass, OutcomeStream, ResilientClient,
    RetryPolicy,
};
pub use domain::*;
pub use error::{Result, VolleyError};
pub use gate::{Authorization, DenialReason, PermissionGate};
pub use http::{HttpClient, HttpRequest, HttpResponse, MockHttpClient, ReqwestHttpClient, TransportError};
#[cfg(feature = "metrics")]
pub use crate::metrics::VolleyMetrics;
pub use service::BatchService;

/// Get the user directory migrator
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
