//! Prometheus recorder.
//!
//! The cluster crate records through the `metrics` facade; installing the
//! recorder here turns those calls into series rendered on `/metrics`.
//! Without it every `counter!`/`histogram!` call is a no-op.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram buckets for routed requests, which cross the network and may
/// include retries (100µs to 5s).
const HISTOGRAM_BUCKETS: &[f64] = &[
    0.000_1, // 100µs
    0.000_25,
    0.000_5,
    0.001, // 1ms
    0.002_5,
    0.005,
    0.01, // 10ms
    0.025,
    0.05,
    0.1, // 100ms
    0.25,
    0.5,
    1.0,
    2.5,
    5.0,
];

/// Installs the global prometheus recorder and returns a handle that
/// renders the current metrics on demand.
pub fn install_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new()
        .set_buckets(HISTOGRAM_BUCKETS)
        .map_err(|e| format!("failed to set histogram buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("failed to install prometheus recorder: {e}"))?;

    Ok(handle)
}

/// Runs histogram upkeep in the background. Required when the recorder is
/// installed without the exporter's own HTTP listener.
pub fn spawn_upkeep(handle: PrometheusHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            handle.run_upkeep();
        }
    });
}

/// Records one served HTTP request.
pub fn record_http(route: &'static str, status: u16) {
    metrics::counter!(
        "slotline_http_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}
