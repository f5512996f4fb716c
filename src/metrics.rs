//! Production observability metrics.
//!
//! Collects batch throughput, retry behavior, and credential health via the
//! `metrics` crate, with an optional Prometheus scrape endpoint. Metric
//! emission is fire-and-forget: a missing exporter never blocks processing.

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Initialize the metrics system with a Prometheus exporter.
///
/// Call once at startup when a scrape endpoint is wanted; all `counter!`
/// call sites degrade to no-ops when this is never called.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "episodes_succeeded_total",
        Unit::Count,
        "Episodes processed successfully"
    );

    describe_counter!(
        "episodes_failed_total",
        Unit::Count,
        "Episodes that failed terminally"
    );

    describe_counter!(
        "episodes_skipped_total",
        Unit::Count,
        "Episodes skipped because the ledger already recorded them"
    );

    describe_counter!(
        "retry_attempts_total",
        Unit::Count,
        "Failed processing attempts, labeled by error kind"
    );

    describe_counter!(
        "credential_wait_total",
        Unit::Count,
        "Times a worker had to wait because no credential was eligible"
    );

    describe_counter!(
        "credential_wait_exhausted_total",
        Unit::Count,
        "Times the maximum credential wait elapsed without an acquisition"
    );

    describe_counter!(
        "checkpoint_writes_total",
        Unit::Count,
        "Checkpoint persistence operations"
    );

    info!(addr = %addr, "metrics system initialized");
    Ok(())
}
