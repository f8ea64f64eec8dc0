//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Records**: Counts of records received, broadcast and discarded
//! - **Connections**: Stream connection state and SSE subscribers
//! - **Reconciliation**: Rule reset outcomes and durations
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tweet_relay_records_received_total",
        "Total records decoded from the filtered stream"
    );
    describe_counter!(
        "tweet_relay_records_broadcast_total",
        "Total record deliveries to SSE subscribers"
    );
    describe_counter!(
        "tweet_relay_records_discarded_total",
        "Total stream chunks discarded by reason"
    );
    describe_counter!(
        "tweet_relay_records_lagged_total",
        "Total records skipped by slow subscribers"
    );

    describe_gauge!(
        "tweet_relay_stream_connected",
        "1 while the filtered stream is connected"
    );
    describe_gauge!(
        "tweet_relay_subscribers",
        "Number of connected SSE subscribers"
    );

    describe_counter!(
        "tweet_relay_stream_errors_total",
        "Total filtered stream errors by type"
    );
    describe_counter!(
        "tweet_relay_reconnects_total",
        "Total filtered stream reconnection attempts"
    );

    describe_counter!(
        "tweet_relay_reconciliations_total",
        "Total rule reconciliations by outcome"
    );
    describe_histogram!(
        "tweet_relay_reconciliation_seconds",
        "Time to list, delete and add filter rules"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a stream chunk produced no record.
#[derive(Debug, Clone, Copy)]
pub enum DiscardReason {
    /// Not valid JSON.
    Malformed,
    /// Larger than the record size limit.
    Oversized,
}

impl DiscardReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Oversized => "oversized",
        }
    }
}

/// Outcome label for a reconciliation.
#[derive(Debug, Clone, Copy)]
pub enum ReconcileOutcome {
    /// All three rule calls succeeded.
    Success,
    /// A rule call failed.
    Failure,
}

impl ReconcileOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a record decoded from the stream.
pub fn record_record_received() {
    counter!("tweet_relay_records_received_total").increment(1);
}

/// Record deliveries of one record to `count` subscribers.
pub fn record_records_broadcast(count: u64) {
    counter!("tweet_relay_records_broadcast_total").increment(count);
}

/// Record a discarded chunk.
pub fn record_record_discarded(reason: DiscardReason) {
    counter!(
        "tweet_relay_records_discarded_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record records skipped by a lagging subscriber.
pub fn record_records_lagged(count: u64) {
    counter!("tweet_relay_records_lagged_total").increment(count);
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("tweet_relay_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the subscriber count.
pub fn set_subscribers(count: f64) {
    gauge!("tweet_relay_subscribers").set(count);
}

/// Record a stream error.
pub fn record_stream_error(error_type: &str) {
    counter!(
        "tweet_relay_stream_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a stream reconnection attempt.
pub fn record_reconnect() {
    counter!("tweet_relay_reconnects_total").increment(1);
}

/// Record a finished reconciliation.
pub fn record_reconciliation(outcome: ReconcileOutcome, duration: Duration) {
    counter!(
        "tweet_relay_reconciliations_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("tweet_relay_reconciliation_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
