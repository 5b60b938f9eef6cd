//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record the number of registered WebSocket channels.
pub fn record_ws_connections(active: usize) {
    metrics::gauge!("ws_connections_active").set(active as f64);
}

/// Record one broadcast of the given event type.
pub fn record_broadcast(event: &str) {
    let labels = [("event", event.to_string())];
    metrics::counter!("sync_broadcasts_total", &labels).increment(1);
}

/// Record an action batch with its size and duration.
pub fn record_batch(actions: usize, duration_secs: f64) {
    metrics::counter!("action_batches_total").increment(1);
    metrics::counter!("actions_total").increment(actions as u64);
    metrics::histogram!("action_batch_duration_seconds").record(duration_secs);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder per process; a second install reports an error.
        if let Ok(handle) = install_prometheus_recorder() {
            record_broadcast("element_created");
            let output = handle.render();
            assert!(output.is_empty() || output.contains("sync_broadcasts_total"));
        }
    }

    #[test]
    fn test_record_batch_does_not_panic() {
        record_batch(3, 0.012);
    }

    #[test]
    fn test_connection_gauge_tracks_registry_size() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_ws_connections(3);
            record_ws_connections(1);
        });

        let rendered = handle.render();
        let value: f64 = rendered
            .lines()
            .find_map(|l| l.strip_prefix("ws_connections_active "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(value, 1.0);
    }

    #[test]
    fn test_record_error_does_not_panic() {
        record_error("validation");
    }
}
