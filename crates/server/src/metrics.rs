//! Process-wide Prometheus recorder for the counters the core emits.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Handle to the global recorder, installing it on first use.
///
/// If another recorder is already installed the handle renders a detached registry, so
/// `/metrics` keeps answering with whatever this process records through it.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "global metrics recorder unavailable, using detached");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}
