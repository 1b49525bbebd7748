//! Prometheus metrics for batch dispatch monitoring.
//!
//! Metrics are organized into three categories:
//! - **Gauges**: Point-in-time state (chunks in flight)
//! - **Counters**: Cumulative totals (chunk outcomes, retries, permission decisions)
//! - **Histograms**: Distributions (chunk dispatch duration)
//!
//! All metrics are labelled by dispatch profile where it applies.

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry};
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::error::Result;

/// Prometheus metrics registry for the dispatcher.
#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct VolleyMetrics {
    registry: Registry,

    chunks_in_flight: GaugeVec,

    chunk_outcomes_total: CounterVec,
    chunk_retries_total: CounterVec,
    permission_checks_total: CounterVec,

    chunk_duration_seconds: HistogramVec,
}

#[cfg(feature = "metrics")]
impl VolleyMetrics {
    /// Create a new VolleyMetrics instance with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics fail to register (e.g., duplicate registration).
    pub fn new(registry: Registry) -> Result<Self> {
        let chunks_in_flight = GaugeVec::new(
            Opts::new(
                "volley_chunks_in_flight",
                "Number of chunk dispatches currently in flight",
            ),
            &["profile"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create chunks_in_flight gauge: {}", e))?;

        let chunk_outcomes_total = CounterVec::new(
            Opts::new(
                "volley_chunk_outcomes_total",
                "Total number of chunk outcomes by kind",
            ),
            &["profile", "outcome"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create chunk_outcomes_total counter: {}", e))?;

        let chunk_retries_total = CounterVec::new(
            Opts::new(
                "volley_chunk_retries_total",
                "Total number of chunk dispatch retries",
            ),
            &["profile"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create chunk_retries_total counter: {}", e))?;

        let permission_checks_total = CounterVec::new(
            Opts::new(
                "volley_permission_checks_total",
                "Total number of permission checks by decision",
            ),
            &["decision"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create permission_checks_total counter: {}", e))?;

        let chunk_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "volley_chunk_duration_seconds",
                "Chunk dispatch duration in seconds, retries included",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["profile"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create chunk_duration_seconds histogram: {}", e))?;

        registry
            .register(Box::new(chunks_in_flight.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register chunks_in_flight: {}", e))?;
        registry
            .register(Box::new(chunk_outcomes_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register chunk_outcomes_total: {}", e))?;
        registry
            .register(Box::new(chunk_retries_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register chunk_retries_total: {}", e))?;
        registry
            .register(Box::new(permission_checks_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register permission_checks_total: {}", e))?;
        registry
            .register(Box::new(chunk_duration_seconds.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register chunk_duration_seconds: {}", e))?;

        Ok(Self {
            registry,
            chunks_in_flight,
            chunk_outcomes_total,
            chunk_retries_total,
            permission_checks_total,
            chunk_duration_seconds,
        })
    }

    /// Get the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_chunks_in_flight(&self, profile: &str, count: usize) {
        self.chunks_in_flight
            .with_label_values(&[profile])
            .set(count as f64);
    }

    /// Record a finished chunk: its outcome label, retries used and total duration.
    pub fn record_chunk(&self, profile: &str, outcome: &str, retries: u32, duration: Duration) {
        self.chunk_outcomes_total
            .with_label_values(&[profile, outcome])
            .inc();
        if retries > 0 {
            self.chunk_retries_total
                .with_label_values(&[profile])
                .inc_by(retries as f64);
        }
        self.chunk_duration_seconds
            .with_label_values(&[profile])
            .observe(duration.as_secs_f64());
    }

    pub fn record_permission(&self, allowed: bool) {
        let decision = if allowed { "allowed" } else { "denied" };
        self.permission_checks_total
            .with_label_values(&[decision])
            .inc();
    }
}
