//! Dispatcher configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::profile::DispatchProfile;
use super::retry::{ShouldRetryFn, default_should_retry};
use crate::domain::{DEFAULT_FANOUT, ResponseShape};
use crate::error::{Result, VolleyError};

fn default_should_retry_fn() -> ShouldRetryFn {
    std::sync::Arc::new(default_should_retry)
}

/// Configuration for the dispatcher.
///
/// Immutable once a dispatcher is built; every concurrent chunk dispatch reads
/// the same value.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Base URL of the downstream user-creation service
    pub downstream_url: String,

    /// Base URL of the permission authority; lookups go to `{authority_url}/permission/{principal}`
    pub authority_url: String,

    /// Number of chunks a batch is split into, and the in-flight bound
    pub fanout: usize,

    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Base backoff duration in milliseconds (will be exponentially increased)
    pub backoff_ms: u64,

    /// Factor by which the backoff_ms is increased with each retry
    pub backoff_factor: u64,

    /// Maximum backoff time in milliseconds
    pub max_backoff_ms: u64,

    /// Timeout for the permission lookup in milliseconds
    pub permission_timeout_ms: u64,

    /// Per-attempt timeout for the summary endpoint
    pub summary_timeout_ms: u64,

    /// Per-attempt timeout for the detailed (success/error lists) endpoint
    pub detailed_timeout_ms: u64,

    /// Per-attempt timeout for the per-record endpoint
    pub per_record_timeout_ms: u64,

    /// Idle connections kept per host by the shared HTTP pool
    pub pool_max_idle_per_host: usize,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Batch size generated when a caller supplies no requests
    pub default_fixture_size: usize,

    /// Predicate function to determine if a failed attempt should be retried.
    /// Defaults to retrying 5xx statuses, timeouts and premature closes.
    #[serde(skip, default = "default_should_retry_fn")]
    pub should_retry: ShouldRetryFn,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            downstream_url: "http://localhost:8082".to_string(),
            authority_url: "http://localhost:8082/api/users".to_string(),
            fanout: DEFAULT_FANOUT,
            max_retries: 3,
            backoff_ms: 2000,
            backoff_factor: 2,
            max_backoff_ms: 16_000,
            permission_timeout_ms: 5000,
            summary_timeout_ms: 10_000,
            detailed_timeout_ms: 30_000,
            per_record_timeout_ms: 30_000,
            pool_max_idle_per_host: 50,
            connect_timeout_ms: 10_000,
            default_fixture_size: 20,
            should_retry: default_should_retry_fn(),
        }
    }
}

impl std::fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("downstream_url", &self.downstream_url)
            .field("authority_url", &self.authority_url)
            .field("fanout", &self.fanout)
            .field("max_retries", &self.max_retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("permission_timeout_ms", &self.permission_timeout_ms)
            .field("summary_timeout_ms", &self.summary_timeout_ms)
            .field("detailed_timeout_ms", &self.detailed_timeout_ms)
            .field("per_record_timeout_ms", &self.per_record_timeout_ms)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("default_fixture_size", &self.default_fixture_size)
            .finish_non_exhaustive()
    }
}

/// Parse an override variable, ignoring it if unset or malformed.
fn override_value<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!(variable = name, value = %raw, "Ignoring malformed environment override");
            None
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by `VOLLEY_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        tracing::debug!(config = ?config, "Loaded dispatcher configuration");
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `VOLLEY_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = override_value(&lookup, "VOLLEY_DOWNSTREAM_URL") {
            self.downstream_url = url;
        }
        if let Some(url) = override_value(&lookup, "VOLLEY_AUTHORITY_URL") {
            self.authority_url = url;
        }
        if let Some(fanout) = override_value(&lookup, "VOLLEY_FANOUT") {
            self.fanout = fanout;
        }
        if let Some(max_retries) = override_value(&lookup, "VOLLEY_MAX_RETRIES") {
            self.max_retries = max_retries;
        }
        if let Some(backoff_ms) = override_value(&lookup, "VOLLEY_BACKOFF_MS") {
            self.backoff_ms = backoff_ms;
        }
        if let Some(backoff_factor) = override_value(&lookup, "VOLLEY_BACKOFF_FACTOR") {
            self.backoff_factor = backoff_factor;
        }
        if let Some(max_backoff_ms) = override_value(&lookup, "VOLLEY_MAX_BACKOFF_MS") {
            self.max_backoff_ms = max_backoff_ms;
        }
        if let Some(timeout) = override_value(&lookup, "VOLLEY_PERMISSION_TIMEOUT_MS") {
            self.permission_timeout_ms = timeout;
        }
        if let Some(timeout) = override_value(&lookup, "VOLLEY_SUMMARY_TIMEOUT_MS") {
            self.summary_timeout_ms = timeout;
        }
        if let Some(timeout) = override_value(&lookup, "VOLLEY_DETAILED_TIMEOUT_MS") {
            self.detailed_timeout_ms = timeout;
        }
        if let Some(timeout) = override_value(&lookup, "VOLLEY_PER_RECORD_TIMEOUT_MS") {
            self.per_record_timeout_ms = timeout;
        }
        if let Some(pool) = override_value(&lookup, "VOLLEY_POOL_MAX_IDLE_PER_HOST") {
            self.pool_max_idle_per_host = pool;
        }
        if let Some(timeout) = override_value(&lookup, "VOLLEY_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = timeout;
        }
        if let Some(size) = override_value(&lookup, "VOLLEY_DEFAULT_FIXTURE_SIZE") {
            self.default_fixture_size = size;
        }
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.fanout == 0 {
            return Err(VolleyError::invalid_config("fanout must be at least 1"));
        }
        if self.downstream_url.trim().is_empty() {
            return Err(VolleyError::invalid_config("downstream_url is empty"));
        }
        if self.authority_url.trim().is_empty() {
            return Err(VolleyError::invalid_config("authority_url is empty"));
        }
        if self.backoff_factor == 0 {
            return Err(VolleyError::invalid_config("backoff_factor must be at least 1"));
        }
        if self.pool_max_idle_per_host < self.fanout {
            return Err(VolleyError::invalid_config(format!(
                "pool_max_idle_per_host ({}) is smaller than fanout ({})",
                self.pool_max_idle_per_host, self.fanout
            )));
        }
        Ok(())
    }

    /// `POST /api/users/batch_async` with the short timeout; summary body.
    pub fn summary_profile(&self) -> DispatchProfile {
        DispatchProfile::new(
            "summary",
            "/api/users/batch_async",
            self.summary_timeout_ms,
            ResponseShape::Summary,
        )
    }

    /// `POST /api/users/batch_success_error` with the longer timeout; success/error lists.
    pub fn detailed_profile(&self) -> DispatchProfile {
        DispatchProfile::new(
            "detailed",
            "/api/users/batch_success_error",
            self.detailed_timeout_ms,
            ResponseShape::Detailed,
        )
    }

    /// `POST /api/users/batch`; flat per-user result list.
    pub fn per_record_profile(&self) -> DispatchProfile {
        DispatchProfile::new(
            "per_record",
            "/api/users/batch",
            self.per_record_timeout_ms,
            ResponseShape::PerRecord,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fanout, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.summary_timeout_ms < config.detailed_timeout_ms);
    }

    #[test]
    fn test_validation_rejects_zero_fanout_and_small_pool() {
        let config = DispatcherConfig {
            fanout: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VolleyError::InvalidConfig(_))
        ));

        let config = DispatcherConfig {
            pool_max_idle_per_host: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config_keeps_defaults() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"downstream_url": "http://users:9000", "fanout": 3}"#)
                .unwrap();
        assert_eq!(config.downstream_url, "http://users:9000");
        assert_eq!(config.fanout, 3);
        assert_eq!(config.max_retries, 3);
        assert!((config.should_retry)(
            &crate::dispatcher::FailureClass::Timeout,
            1
        ));
    }

    #[test]
    fn test_profiles_use_configured_timeouts() {
        let config = DispatcherConfig {
            summary_timeout_ms: 1234,
            ..Default::default()
        };
        let profile = config.summary_profile();
        assert_eq!(profile.timeout_ms, 1234);
        assert_eq!(profile.path, "/api/users/batch_async");
        assert_eq!(config.detailed_profile().shape, ResponseShape::Detailed);
        assert_eq!(config.per_record_profile().shape, ResponseShape::PerRecord);
    }

    #[test]
    fn test_overrides_apply_and_skip_malformed_values() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("VOLLEY_DOWNSTREAM_URL", "http://users:9000"),
            ("VOLLEY_FANOUT", "7"),
            ("VOLLEY_BACKOFF_FACTOR", "3"),
            ("VOLLEY_CONNECT_TIMEOUT_MS", "2500"),
            ("VOLLEY_DEFAULT_FIXTURE_SIZE", "40"),
            ("VOLLEY_MAX_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = DispatcherConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.downstream_url, "http://users:9000");
        assert_eq!(config.fanout, 7);
        assert_eq!(config.backoff_factor, 3);
        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.default_fixture_size, 40);
        // Malformed values are ignored
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        // Only this test touches these variables
        unsafe {
            std::env::set_var("VOLLEY_BACKOFF_FACTOR", "4");
            std::env::set_var("VOLLEY_CONNECT_TIMEOUT_MS", "1500");
            std::env::set_var("VOLLEY_DEFAULT_FIXTURE_SIZE", "8");
        }

        let config = DispatcherConfig::from_env();

        unsafe {
            std::env::remove_var("VOLLEY_BACKOFF_FACTOR");
            std::env::remove_var("VOLLEY_CONNECT_TIMEOUT_MS");
            std::env::remove_var("VOLLEY_DEFAULT_FIXTURE_SIZE");
        }

        assert_eq!(config.backoff_factor, 4);
        assert_eq!(config.connect_timeout_ms, 1500);
        assert_eq!(config.default_fixture_size, 8);
    }
}
