//! Prometheus metrics.
//!
//! The recorder only collects; nothing listens on a port. A short-lived CLI
//! process pushes the rendered payload to a push gateway when it exits.

use crate::config::MetricsConfig;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Metrics handle for flushing on shutdown.
#[derive(Debug)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    push_gateway: Option<String>,
}

impl MetricsHandle {
    /// Renders the current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

/// Installs the Prometheus recorder as the global metrics recorder.
///
/// Returns `None` when metrics are disabled.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let prometheus = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    })?;

    Ok(Some(MetricsHandle {
        prometheus,
        push_gateway: config
            .push_gateway
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string),
    }))
}

/// Pushes metrics to the push gateway if one is configured.
///
/// Failures are logged; metrics are never worth failing a command over.
pub fn flush(handle: &MetricsHandle) {
    let Some(endpoint) = &handle.push_gateway else {
        tracing::debug!("No push gateway configured, skipping flush");
        return;
    };

    let mut payload = handle.render();
    // The push gateway rejects payloads without a trailing newline.
    if !payload.ends_with('\n') {
        payload.push('\n');
    }
    tracing::debug!(bytes = payload.len(), endpoint = %endpoint, "Pushing metrics");

    // POST accumulates per-job series instead of replacing them.
    let response = Client::new()
        .post(endpoint)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .timeout(PUSH_TIMEOUT)
        .body(payload)
        .send();

    match response {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(status = %resp.status(), "Metrics pushed");
        },
        Ok(resp) => tracing::warn!(status = %resp.status(), "Metrics push rejected"),
        Err(e) => tracing::warn!(error = %e, "Failed to push metrics"),
    }
}
