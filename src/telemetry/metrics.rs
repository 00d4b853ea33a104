//! Prometheus pull registry using the metrics crate.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram, Label, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::task::JoinHandle;

use super::sinks::{MetricLabels, MetricsSink, SinkError};
use super::TelemetryError;

pub const REQUESTS_TOTAL: &str = "api_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";

/// Default buckets of the Prometheus client libraries.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// How often held histogram samples are folded into their buckets. Matches
/// the interval `PrometheusBuilder::install` would use.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Scrape-exposed request metrics.
///
/// Owns its recorder instead of installing a global one, so several
/// registries (one per test server, for instance) can coexist in a process.
#[derive(Clone)]
pub struct PrometheusMetrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                LATENCY_BUCKETS,
            )
            .map_err(|e| TelemetryError::Registry(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(REQUESTS_TOTAL, Unit::Count, "Total HTTP requests");
            describe_histogram!(
                REQUEST_DURATION_SECONDS,
                Unit::Seconds,
                "Request latency (seconds)"
            );
        });

        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
        })
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drains pending histogram samples. A locally built recorder gets no
    /// upkeep thread, so this must be driven by [`spawn_upkeep`](Self::spawn_upkeep)
    /// or samples accumulate until the next scrape.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Runs upkeep every `period` until the returned task is aborted.
    pub fn spawn_upkeep(&self, period: Duration) -> JoinHandle<()> {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                handle.run_upkeep();
            }
        })
    }
}

fn to_labels(labels: &MetricLabels) -> Vec<Label> {
    labels
        .iter()
        .map(|(k, v)| Label::new(*k, v.clone()))
        .collect()
}

impl MetricsSink for PrometheusMetrics {
    fn increment_requests(&self, labels: &MetricLabels) -> Result<(), SinkError> {
        let labels = to_labels(labels);
        metrics::with_local_recorder(self.recorder.as_ref(), || {
            counter!(REQUESTS_TOTAL, labels).increment(1);
        });
        Ok(())
    }

    fn observe_latency(&self, seconds: f64, labels: &MetricLabels) -> Result<(), SinkError> {
        let labels = to_labels(labels);
        metrics::with_local_recorder(self.recorder.as_ref(), || {
            histogram!(REQUEST_DURATION_SECONDS, labels).record(seconds);
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct MetricsState {
    handle: Option<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(registry: &PrometheusMetrics) -> Self {
        Self {
            handle: Some(registry.handle()),
        }
    }

    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }
}

pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<MetricsState>,
) -> impl IntoResponse {
    match state.render() {
        Some(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
            metrics,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not enabled".to_string(),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(status: Option<&str>) -> Vec<(&'static str, String)> {
        let mut labels = vec![
            ("method", "POST".to_string()),
            ("endpoint", "/api/comment/new".to_string()),
        ];
        if let Some(status) = status {
            labels.push(("http_status", status.to_string()));
        }
        labels
    }

    #[test]
    fn test_metrics_state_disabled() {
        let state = MetricsState::disabled();
        assert!(!state.is_enabled());
        assert!(state.render().is_none());
    }

    #[test]
    fn test_counter_renders_with_status_label() {
        let registry = PrometheusMetrics::new().unwrap();
        registry.increment_requests(&labels(Some("201"))).unwrap();
        registry.increment_requests(&labels(Some("201"))).unwrap();

        let output = registry.render();
        let line = output
            .lines()
            .find(|l| l.starts_with(REQUESTS_TOTAL) && l.contains("http_status=\"201\""))
            .expect("counter line present");
        assert!(line.contains("method=\"POST\""));
        assert!(line.contains("endpoint=\"/api/comment/new\""));
        assert!(line.ends_with(" 2"));
    }

    #[test]
    fn test_histogram_uses_buckets() {
        let registry = PrometheusMetrics::new().unwrap();
        registry.observe_latency(0.02, &labels(None)).unwrap();

        let output = registry.render();
        assert!(output.contains("api_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.025\""));
        assert!(output.contains("api_request_duration_seconds_count"));
    }

    #[test]
    fn test_upkeep_keeps_histogram_counts() {
        let registry = PrometheusMetrics::new().unwrap();
        for _ in 0..3 {
            registry.observe_latency(0.02, &labels(None)).unwrap();
        }
        registry.run_upkeep();
        registry.observe_latency(0.3, &labels(None)).unwrap();
        registry.run_upkeep();

        let output = registry.render();
        let count = output
            .lines()
            .find(|l| l.starts_with("api_request_duration_seconds_count"))
            .expect("histogram count present");
        assert!(count.ends_with(" 4"));
        let bucket = output
            .lines()
            .find(|l| {
                l.starts_with("api_request_duration_seconds_bucket") && l.contains("le=\"0.025\"")
            })
            .expect("bucket present");
        assert!(bucket.ends_with(" 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upkeep_task_runs_until_aborted() {
        let registry = PrometheusMetrics::new().unwrap();
        let task = registry.spawn_upkeep(UPKEEP_INTERVAL);
        registry.observe_latency(0.02, &labels(None)).unwrap();

        tokio::time::sleep(UPKEEP_INTERVAL * 2).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let output = registry.render();
        assert!(output.contains("api_request_duration_seconds_count"));
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = PrometheusMetrics::new().unwrap();
        let second = PrometheusMetrics::new().unwrap();
        first.increment_requests(&labels(Some("200"))).unwrap();

        assert!(first.render().contains(REQUESTS_TOTAL));
        assert!(!second.render().contains("http_status=\"200\""));
    }

    #[test]
    fn test_metrics_state_renders_registry() {
        let registry = PrometheusMetrics::new().unwrap();
        let state = MetricsState::new(&registry);
        registry.increment_requests(&labels(Some("422"))).unwrap();

        assert!(state.is_enabled());
        assert!(state.render().unwrap().contains("http_status=\"422\""));
    }
}
