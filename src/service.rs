//! Batch creation service.
//!
//! Front door for callers: fills in a generated batch when none is supplied,
//! runs the dispatcher and reduces its outcomes into a [`BatchResult`].

use crate::dispatcher::{DispatchProfile, Dispatcher, DispatcherConfig, OutcomeStream};
use crate::domain::{Batch, BatchResult};
use crate::error::Result;
use crate::fixtures;
use crate::http::{HttpClient, ReqwestHttpClient};

pub struct BatchService<H>
where
    H: HttpClient,
{
    dispatcher: Dispatcher<H>,
}

impl BatchService<ReqwestHttpClient> {
    /// Build a service backed by a pooled reqwest client.
    pub fn from_config(config: DispatcherConfig) -> Result<Self> {
        let http_client =
            ReqwestHttpClient::with_pool(config.pool_max_idle_per_host, config.connect_timeout_ms)?;
        Self::new(http_client, config)
    }
}

impl<H> BatchService<H>
where
    H: HttpClient + 'static,
{
    pub fn new(http_client: H, config: DispatcherConfig) -> Result<Self> {
        Ok(Self {
            dispatcher: Dispatcher::new(http_client, config)?,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<H> {
        &self.dispatcher
    }

    fn resolve_batch(&self, batch: Option<Batch>) -> Batch {
        // Only an absent batch is generated; an empty one is dispatched as-is
        batch.unwrap_or_else(|| {
            let count = self.dispatcher.config().default_fixture_size;
            tracing::info!(count, "No requests supplied, generating batch");
            fixtures::generate_users(count)
        })
    }

    /// Create users and wait for the aggregated result.
    #[tracing::instrument(skip(self, batch, profile), fields(profile = %profile.name))]
    pub async fn create_users(
        &self,
        principal: &str,
        batch: Option<Batch>,
        profile: &DispatchProfile,
    ) -> BatchResult {
        let batch = self.resolve_batch(batch);
        let result = self
            .dispatcher
            .run_to_result(batch, principal, profile.clone())
            .await;

        tracing::info!(
            status = result.overall_status.status_code(),
            success_count = result.success_count,
            failure_count = result.failure_count,
            error_count = result.error_count,
            "Batch creation finished"
        );
        result
    }

    /// Create users and stream chunk outcomes as they complete.
    pub fn create_users_stream(
        &self,
        principal: &str,
        batch: Option<Batch>,
        profile: &DispatchProfile,
    ) -> OutcomeStream {
        let batch = self.resolve_batch(batch);
        self.dispatcher.run(batch, principal, profile.clone())
    }
}
