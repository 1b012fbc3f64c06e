//! Prometheus exporter shared by the hireflow binaries.

use std::env;
use std::sync::OnceLock;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn resolve_port(raw: Option<String>, default_port: u16) -> u16 {
    raw.and_then(|raw| raw.trim().parse::<u16>().ok())
        .filter(|port| *port != 0)
        .unwrap_or(default_port)
}

/// Starts the exporter on `0.0.0.0:<port>`, with the port read from `port_env`.
///
/// Returns the existing handle on repeated calls and `None` if the listener
/// could not be installed.
pub fn init_metrics(port_env: &str, default_port: u16) -> Option<&'static PrometheusHandle> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Some(existing);
    }
    let port = resolve_port(env::var(port_env).ok(), default_port);

    match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install_recorder()
    {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            describe_pipeline_metrics();
            info!(metrics_port = port, "prometheus exporter listening");
            PROMETHEUS_HANDLE.get()
        }
        Err(err) => {
            warn!(error = %err, metrics_port = port, "prometheus exporter not started");
            None
        }
    }
}

fn describe_pipeline_metrics() {
    describe_counter!(
        "hf_stage_transitions_total",
        "Committed stage transitions by outcome (advanced, hired, rejected, stale)"
    );
    describe_histogram!(
        "hf_stage_evaluation_seconds",
        Unit::Seconds,
        "Latency of AI stage evaluations"
    );
    describe_histogram!(
        "hf_llm_request_seconds",
        Unit::Seconds,
        "Latency of AI gateway calls by function"
    );
    describe_counter!("hf_emails_total", "Candidate emails by delivery result");
    describe_gauge!("hf_board_subscriptions", "Open pipeline board streams");
    describe_counter!(
        "hf_worker_records_total",
        "Records processed by the pipeline worker by result"
    );
}

#[cfg(test)]
mod tests {
    use super::resolve_port;

    #[test]
    fn port_falls_back_on_missing_or_invalid_values() {
        assert_eq!(resolve_port(None, 9100), 9100);
        assert_eq!(resolve_port(Some("9200".into()), 9100), 9200);
        assert_eq!(resolve_port(Some(" 9300 ".into()), 9100), 9300);
        assert_eq!(resolve_port(Some("not-a-port".into()), 9100), 9100);
        assert_eq!(resolve_port(Some("0".into()), 9100), 9100);
    }
}
