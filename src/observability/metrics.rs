//! Process metrics.
//!
//! # Responsibilities
//! - Install the Prometheus recorder behind the `metrics` facade
//! - Count probes and config reloads for the `/metrics` endpoint
//!
//! # Metrics
//! - `probe_exporter_probes_total` (counter): probes by prober, module, result
//! - `probe_exporter_probe_duration_seconds` (histogram): probe latency
//! - `probe_exporter_config_last_reload_successful` (gauge): 1 or 0
//! - `probe_exporter_config_last_reload_success_timestamp_seconds` (gauge)
//! - `probe_exporter_config_generation` (gauge): generation of the active config
//!
//! Per-probe results are not recorded here; see `exposition`.

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::ProberKind;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder on first use and return its handle.
///
/// When another recorder is already installed the handle renders an empty
/// registry instead.
pub fn handle() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Metrics recorder already installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

pub fn record_probe(prober: ProberKind, module: &str, success: bool, duration: Duration) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!(
        "probe_exporter_probes_total",
        "prober" => prober.as_str(),
        "module" => module.to_string(),
        "result" => result
    )
    .increment(1);
    metrics::histogram!(
        "probe_exporter_probe_duration_seconds",
        "prober" => prober.as_str(),
        "module" => module.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_config_reload(success: bool, generation: u64) {
    metrics::gauge!("probe_exporter_config_last_reload_successful").set(if success { 1.0 } else { 0.0 });
    if success {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        metrics::gauge!("probe_exporter_config_last_reload_success_timestamp_seconds").set(now);
        metrics::gauge!("probe_exporter_config_generation").set(generation as f64);
    }
}
