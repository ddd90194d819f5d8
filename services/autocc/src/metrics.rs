//! Prometheus metrics exposition
//!
//! Series recorded by the service:
//!
//! - `autocc_process_total` (counter): label `outcome` (`done` or an error kind)
//! - `autocc_process_duration_seconds` (histogram)
//! - `autocc_tasks_total` (counter): labels `kind` (`caption`, `metadata`), `outcome`
//!
//! The quota broker adds `autocc_quota_reservations_total` and
//! `autocc_quota_released_total`.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

/// Bucket boundaries for whole translation runs, 1s to 30min.
const PROCESS_BUCKETS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("autocc_process_duration_seconds".to_string()),
        PROCESS_BUCKETS,
    )
}

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must run inside the tokio runtime: the exporter's HTTP listener is
/// spawned onto it.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    builder()?.with_http_listener(addr).install()
}

/// Record a finished `process` run.
pub fn record_process(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("autocc_process_total", "outcome" => outcome).increment(1);
    metrics::histogram!("autocc_process_duration_seconds").record(duration_secs);
}

/// Record a finished per-language task.
pub fn record_task(kind: &'static str, outcome: &'static str) {
    metrics::counter!("autocc_tasks_total", "kind" => kind, "outcome" => outcome).increment(1);
}
