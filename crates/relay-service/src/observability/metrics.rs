//! Metrics definitions for the relay service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded; fingerprints and connection IDs are never used as labels.
//! - `actor_type`: 2 values (channel, connection)
//! - `event`: bounded by protocol events (join, update, malformed)
//! - `kind`: bounded by `ErrorKind` (5 values)
//! - `outcome`: delivered, dropped, stale

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Update latency buckets
/// target a p99 well under 100ms for validate + merge + fan-out.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("relay_update".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set update latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of open client connections.
///
/// Metric: `relay_connections_active`
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Set the number of live channels.
///
/// Metric: `relay_channels_active`
pub fn set_channels_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_channels_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `relay_actor_mailbox_depth`
/// Labels: `actor_type` (channel, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record an inbound client message.
///
/// Metric: `relay_messages_total`
/// Labels: `event`
pub fn record_message(event: &str) {
    counter!("relay_messages_total", "event" => event.to_string()).increment(1);
}

/// Record an error reported back to a client.
///
/// Metric: `relay_errors_total`
/// Labels: `kind`
pub fn record_error(kind: &str) {
    counter!("relay_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record fan-out outcomes for one update.
///
/// Metric: `relay_broadcast_total`
/// Labels: `outcome` (delivered, dropped, stale)
pub fn record_broadcast(outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!("relay_broadcast_total", "outcome" => outcome.to_string()).increment(count as u64);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record end-to-end update handling latency (validate, merge, fan-out).
///
/// Metric: `relay_update_latency_seconds`
pub fn record_update_latency(duration: Duration) {
    histogram!("relay_update_latency_seconds").record(duration.as_secs_f64());
}
