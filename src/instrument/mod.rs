//! Per-request instrumentation: one server span, one entry log record and
//! four metric emissions (push counter and histogram, pull counter and
//! histogram) for every handler invocation.
//!
//! Composed per route with [`Instrumentation::layer`], or driven directly
//! through [`Instrumentation::run`] / [`Instrumentation::begin`].

mod layer;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;

use axum::{http::StatusCode, response::Response, Json};
use tracing::debug;

use crate::telemetry::sinks::NoopSpan;
use crate::telemetry::{CorrelationContext, ServerSpan, Severity, Telemetry, TelemetryRecord};

pub use layer::{InstrumentLayer, InstrumentService, UnclassifiedFailure};

/// Status assumed when a successful result carries none.
pub const DEFAULT_SUCCESS_STATUS: u16 = 200;
/// Status recorded for failures that carry no client-facing code, and for
/// requests abandoned before the handler finished.
pub const FALLBACK_FAILURE_STATUS: u16 = 500;

/// Client-facing status code carried by a handler result or error, if any.
pub trait ReportStatus {
    fn status_code(&self) -> Option<u16>;
}

impl ReportStatus for Response {
    fn status_code(&self) -> Option<u16> {
        Some(self.status().as_u16())
    }
}

impl<T> ReportStatus for Json<T> {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl<T> ReportStatus for (StatusCode, T) {
    fn status_code(&self) -> Option<u16> {
        Some(self.0.as_u16())
    }
}

impl ReportStatus for Infallible {
    fn status_code(&self) -> Option<u16> {
        match *self {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal return with its status code.
    Completed(u16),
    /// Error carrying an explicit client-facing status code.
    Rejected(u16),
    /// Error without a status code, or the request never finished.
    Failed,
}

impl Outcome {
    pub fn from_result<T: ReportStatus, E: ReportStatus>(result: &Result<T, E>) -> Self {
        match result {
            Ok(value) => {
                Outcome::Completed(value.status_code().unwrap_or(DEFAULT_SUCCESS_STATUS))
            }
            Err(e) => e.status_code().map_or(Outcome::Failed, Outcome::Rejected),
        }
    }

    /// Status code used for the pull counter's `http_status` label.
    pub fn metric_status(&self) -> u16 {
        match self {
            Outcome::Completed(code) | Outcome::Rejected(code) => *code,
            Outcome::Failed => FALLBACK_FAILURE_STATUS,
        }
    }
}

/// Wraps handlers with the request telemetry pipeline.
///
/// Holds only the injected sinks; every invocation keeps its own timing and
/// context, so one instance serves any number of concurrent requests.
#[derive(Clone)]
pub struct Instrumentation {
    telemetry: Telemetry,
}

impl Instrumentation {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Route layer recording under `endpoint`, which must be the route
    /// template and never the concrete path.
    pub fn layer(&self, endpoint: &'static str) -> InstrumentLayer {
        InstrumentLayer::new(self.clone(), endpoint)
    }

    /// Opens the span and emits the entry log record. The returned guard
    /// finalizes metrics and closes the span when it is completed or dropped.
    pub fn begin(
        &self,
        endpoint: &'static str,
        method: &str,
        parent: Option<CorrelationContext>,
    ) -> InFlight {
        let started = Instant::now();

        let attributes = [
            ("http.method", method.to_string()),
            ("http.route", endpoint.to_string()),
        ];
        let span = match self
            .telemetry
            .traces
            .start_server_span(endpoint, parent, &attributes)
        {
            Ok(span) => span,
            Err(e) => {
                self.telemetry.report(Err(e));
                Box::new(NoopSpan)
            }
        };
        let correlation = span.correlation();

        let mut record_attributes = BTreeMap::new();
        record_attributes.insert("endpoint".to_string(), endpoint.to_string());
        record_attributes.insert("method".to_string(), method.to_string());
        let record = TelemetryRecord::now(
            Severity::Info,
            format!("Endpoint called: {}", endpoint),
            record_attributes,
            correlation,
        );
        self.telemetry.report(self.telemetry.logs.emit(record));

        InFlight {
            telemetry: self.telemetry.clone(),
            endpoint,
            method: method.to_string(),
            started,
            span,
            correlation,
            outcome: None,
        }
    }

    /// Runs `handler` inside the pipeline and returns its result untouched.
    ///
    /// The handler receives the request's correlation context. If the
    /// returned future is dropped before completion the request is recorded
    /// as [`Outcome::Failed`].
    pub async fn run<F, Fut, T, E>(
        &self,
        endpoint: &'static str,
        method: &str,
        parent: Option<CorrelationContext>,
        handler: F,
    ) -> Result<T, E>
    where
        F: FnOnce(CorrelationContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ReportStatus,
        E: ReportStatus,
    {
        let in_flight = self.begin(endpoint, method, parent);
        let result = handler(in_flight.correlation()).await;
        in_flight.complete(Outcome::from_result(&result));
        result
    }
}

/// A request between span open and finalization.
pub struct InFlight {
    telemetry: Telemetry,
    endpoint: &'static str,
    method: String,
    started: Instant,
    span: Box<dyn ServerSpan>,
    correlation: CorrelationContext,
    outcome: Option<Outcome>,
}

impl InFlight {
    pub fn correlation(&self) -> CorrelationContext {
        self.correlation
    }

    /// Records the outcome on the span and finalizes.
    pub fn complete(mut self, outcome: Outcome) {
        self.settle(outcome);
    }

    fn settle(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(code) | Outcome::Rejected(code) => self.span.set_status_code(code),
            Outcome::Failed => self.span.set_error("request failed without a status code"),
        }
        self.outcome = Some(outcome);
    }

    fn finalize(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => {
                self.span.set_error("request did not complete");
                Outcome::Failed
            }
        };
        let duration = self.started.elapsed().as_secs_f64();
        let status = outcome.metric_status();

        let labels = [
            ("method", self.method.clone()),
            ("endpoint", self.endpoint.to_string()),
        ];
        let status_labels = [
            ("method", self.method.clone()),
            ("endpoint", self.endpoint.to_string()),
            ("http_status", status.to_string()),
        ];

        let t = &self.telemetry;
        t.report(t.push_metrics.increment_requests(&labels));
        t.report(t.push_metrics.observe_latency(duration, &labels));
        t.report(t.pull_metrics.observe_latency(duration, &labels));
        t.report(t.pull_metrics.increment_requests(&status_labels));
        self.span.end();

        debug!(
            endpoint = self.endpoint,
            method = %self.method,
            status,
            duration_ms = duration * 1000.0,
            outcome = ?outcome,
            "Request instrumented"
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::AppError;
    use crate::store::StoreError;
    use crate::telemetry::memory::TelemetryCapture;
    use crate::telemetry::{LogSink, MetricsSink, SinkError, SinkFailurePolicy};

    const ENDPOINT: &str = "/api/comment/new";

    fn setup() -> (TelemetryCapture, Instrumentation) {
        let capture = TelemetryCapture::new();
        let instrumentation = Instrumentation::new(capture.telemetry());
        (capture, instrumentation)
    }

    fn assert_four_emissions(capture: &TelemetryCapture, status: &str) {
        let push_counts = capture.push.request_counts();
        let pull_counts = capture.pull.request_counts();
        assert_eq!(push_counts.len(), 1);
        assert_eq!(capture.push.latencies().len(), 1);
        assert_eq!(capture.pull.latencies().len(), 1);
        assert_eq!(pull_counts.len(), 1);

        assert_eq!(push_counts[0].len(), 2);
        assert_eq!(push_counts[0]["method"], "POST");
        assert_eq!(push_counts[0]["endpoint"], ENDPOINT);
        assert_eq!(pull_counts[0]["http_status"], status);
        assert_eq!(capture.pull.latencies()[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_success_defaults_to_200() {
        let (capture, instrumentation) = setup();

        let result: Result<Json<u32>, AppError> = instrumentation
            .run(ENDPOINT, "POST", None, |_| async { Ok(Json(7)) })
            .await;

        assert_eq!(result.unwrap().0, 7);
        assert_four_emissions(&capture, "200");

        let spans = capture.traces.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, ENDPOINT);
        assert_eq!(spans[0].status_code, Some(200));
        assert_eq!(spans[0].attributes["http.method"], "POST");
        assert_eq!(spans[0].attributes["http.route"], ENDPOINT);
    }

    #[tokio::test]
    async fn test_explicit_success_status() {
        let (capture, instrumentation) = setup();

        let result: Result<(StatusCode, Json<u32>), AppError> = instrumentation
            .run(ENDPOINT, "POST", None, |_| async {
                Ok((StatusCode::CREATED, Json(1)))
            })
            .await;

        assert!(result.is_ok());
        assert_four_emissions(&capture, "201");
        assert_eq!(capture.traces.finished()[0].status_code, Some(201));
    }

    #[tokio::test]
    async fn test_rejection_propagates_unchanged() {
        let (capture, instrumentation) = setup();

        let result: Result<Json<u32>, AppError> = instrumentation
            .run(ENDPOINT, "POST", None, |_| async {
                Err(AppError::Validation("bad email".to_string()))
            })
            .await;

        match result {
            Err(AppError::Validation(msg)) => assert_eq!(msg, "bad email"),
            other => panic!("unexpected result: {:?}", other.map(|j| j.0)),
        }
        assert_four_emissions(&capture, "422");
        let span = &capture.traces.finished()[0];
        assert_eq!(span.status_code, Some(422));
        assert!(span.error.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_failure_uses_fallback() {
        let (capture, instrumentation) = setup();

        let result: Result<Json<u32>, AppError> = instrumentation
            .run(ENDPOINT, "POST", None, |_| async {
                Err(AppError::Storage(StoreError::Connection("refused".into())))
            })
            .await;

        assert!(matches!(result, Err(AppError::Storage(_))));
        assert_four_emissions(&capture, "500");
        let span = &capture.traces.finished()[0];
        assert_eq!(span.status_code, None);
        assert!(span.error.is_some());
        assert!(!span.attributes.contains_key("http.status_code"));
    }

    #[tokio::test]
    async fn test_cancelled_request_still_finalizes() {
        let (capture, instrumentation) = setup();

        let run = instrumentation.run(ENDPOINT, "POST", None, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AppError>(Json(0))
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), run).await;

        assert!(timed_out.is_err());
        assert_four_emissions(&capture, "500");
        assert_eq!(capture.traces.finished().len(), 1);
        assert!(capture.traces.finished()[0].error.is_some());
    }

    #[tokio::test]
    async fn test_entry_log_precedes_handler_and_metrics_follow() {
        let (capture, instrumentation) = setup();
        let observer = capture.clone();

        let _: Result<Json<()>, AppError> = instrumentation
            .run(ENDPOINT, "POST", None, |correlation| async move {
                let records = observer.logs.records();
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].correlation, correlation);
                assert!(observer.push.events().is_empty());
                assert!(observer.pull.events().is_empty());
                assert!(observer.traces.finished().is_empty());
                Ok(Json(()))
            })
            .await;

        let records = capture.logs.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Info);
        assert_eq!(records[0].body, format!("Endpoint called: {}", ENDPOINT));
        assert_eq!(records[0].attributes["endpoint"], ENDPOINT);
        assert_eq!(records[0].attributes["method"], "POST");
        assert_eq!(
            records[0].correlation,
            capture.traces.finished()[0].correlation
        );
    }

    #[tokio::test]
    async fn test_parent_trace_is_joined() {
        let (capture, instrumentation) = setup();
        let parent = CorrelationContext::new(
            opentelemetry::trace::TraceId::from_bytes(0xfeedu128.to_be_bytes()),
            opentelemetry::trace::SpanId::from_bytes(0x99u64.to_be_bytes()),
            true,
        );

        let _: Result<Json<()>, Infallible> = instrumentation
            .run(ENDPOINT, "GET", Some(parent), |_| async { Ok(Json(())) })
            .await;

        let span = &capture.traces.finished()[0];
        assert_eq!(span.parent, Some(parent));
        assert_eq!(span.correlation.trace_id, parent.trace_id);
    }

    struct FailingLogs;

    impl LogSink for FailingLogs {
        fn emit(&self, _record: TelemetryRecord) -> Result<(), SinkError> {
            Err(SinkError::new("logs", "exporter down"))
        }
    }

    struct FailingMetrics;

    impl MetricsSink for FailingMetrics {
        fn increment_requests(
            &self,
            _labels: &crate::telemetry::sinks::MetricLabels,
        ) -> Result<(), SinkError> {
            Err(SinkError::new("metrics", "exporter down"))
        }

        fn observe_latency(
            &self,
            _seconds: f64,
            _labels: &crate::telemetry::sinks::MetricLabels,
        ) -> Result<(), SinkError> {
            Err(SinkError::new("metrics", "exporter down"))
        }
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_fail_request() {
        for policy in [SinkFailurePolicy::Warn, SinkFailurePolicy::Ignore] {
            let capture = TelemetryCapture::new();
            let telemetry = Telemetry::builder()
                .traces(capture.traces.clone())
                .logs(FailingLogs)
                .push_metrics(FailingMetrics)
                .pull_metrics(capture.pull.clone())
                .failure_policy(policy)
                .build();
            let instrumentation = Instrumentation::new(telemetry);

            let result: Result<Json<u8>, AppError> = instrumentation
                .run(ENDPOINT, "POST", None, |_| async { Ok(Json(3)) })
                .await;

            assert_eq!(result.unwrap().0, 3);
            assert_eq!(capture.pull.request_counts().len(), 1);
            assert_eq!(capture.traces.finished().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_disabled_telemetry_yields_zero_context() {
        let instrumentation = Instrumentation::new(Telemetry::disabled());

        let seen: Result<Json<CorrelationContext>, Infallible> = instrumentation
            .run(ENDPOINT, "GET", None, |correlation| async move {
                Ok(Json(correlation))
            })
            .await;

        assert_eq!(seen.unwrap().0, CorrelationContext::NONE);
    }

    #[test]
    fn test_outcome_classification() {
        let ok: Result<Json<()>, AppError> = Ok(Json(()));
        assert_eq!(Outcome::from_result(&ok), Outcome::Completed(200));

        let conflict: Result<Json<()>, AppError> =
            Err(AppError::Conflict("duplicate".to_string()));
        assert_eq!(Outcome::from_result(&conflict), Outcome::Rejected(409));

        assert_eq!(Outcome::Failed.metric_status(), FALLBACK_FAILURE_STATUS);
    }
}
