//! Prometheus metrics for deploy platform observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a build state transition.
pub fn build_state_changed(state: &str) {
    counter!("deploy_builds_total", "state" => state.to_string()).increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("deploy_build_duration_ms").record(duration_ms as f64);
}

/// Record a release entering or leaving the pipeline.
pub fn release_event(event: &str) {
    counter!("deploy_releases_total", "event" => event.to_string()).increment(1);
}

/// Record a per-target deployment outcome.
pub fn target_deployed(state: &str) {
    counter!("deploy_targets_total", "state" => state.to_string()).increment(1);
}

/// Record a webhook delivery attempt.
pub fn webhook_fired(outcome: &str) {
    counter!("deploy_webhooks_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an inbound trigger request.
pub fn trigger_received(kind: &str) {
    counter!("deploy_triggers_total", "kind" => kind.to_string()).increment(1);
}
