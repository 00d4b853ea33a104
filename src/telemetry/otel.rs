//! OTLP-backed sinks: traces, log records and push metrics.

use std::time::Duration;

use opentelemetry::logs::{
    AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity as OtelSeverity,
};
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry::trace::{
    Span as _, SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::{Logger, LoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{self as sdktrace, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::warn;

use super::sinks::{
    LogSink, MetricLabels, MetricsSink, ServerSpan, Severity, SinkError, TelemetryRecord,
    TraceSink,
};
use super::{CorrelationContext, TelemetryError};

const INSTRUMENTATION_SCOPE: &str = "comments_api";

pub const REQUEST_COUNT: &str = "api_request_count";
pub const REQUEST_LATENCY_SECONDS: &str = "api_request_latency_seconds";

/// SDK providers for the three OTLP signals. Built once at startup and
/// passed down explicitly; never registered as process globals.
pub struct OtelProviders {
    tracer: sdktrace::TracerProvider,
    logger: LoggerProvider,
    meter: SdkMeterProvider,
}

impl OtelProviders {
    pub fn install(
        endpoint: &str,
        service_name: &str,
        export_interval: Duration,
    ) -> Result<Self, TelemetryError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]);

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::exporter("traces", e))?;

        let tracer = sdktrace::TracerProvider::builder()
            .with_batch_exporter(span_exporter, runtime::Tokio)
            .with_resource(resource.clone())
            .build();

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::exporter("logs", e))?;

        let logger = LoggerProvider::builder()
            .with_batch_exporter(log_exporter, runtime::Tokio)
            .with_resource(resource.clone())
            .build();

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::exporter("metrics", e))?;

        let reader = PeriodicReader::builder(metric_exporter, runtime::Tokio)
            .with_interval(export_interval)
            .build();

        let meter = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        Ok(Self {
            tracer,
            logger,
            meter,
        })
    }

    pub fn traces(&self) -> OtelTraces {
        OtelTraces {
            tracer: self.tracer.tracer(INSTRUMENTATION_SCOPE),
        }
    }

    pub fn logs(&self) -> OtelLogs {
        OtelLogs {
            logger: self.logger.logger(INSTRUMENTATION_SCOPE),
        }
    }

    pub fn push_metrics(&self) -> OtelMetrics {
        OtelMetrics::new(&self.meter.meter(INSTRUMENTATION_SCOPE))
    }

    /// Flushes pending batches and stops the exporters. Metrics go first so
    /// the final periodic export still runs while the collector connection
    /// is up.
    pub fn shutdown(&self) {
        if let Err(e) = self.meter.shutdown() {
            warn!(error = %e, "Failed to shut down meter provider");
        }
        if let Err(e) = self.logger.shutdown() {
            warn!(error = %e, "Failed to shut down logger provider");
        }
        if let Err(e) = self.tracer.shutdown() {
            warn!(error = %e, "Failed to shut down tracer provider");
        }
    }
}

pub struct OtelTraces {
    tracer: Tracer,
}

impl TraceSink for OtelTraces {
    fn start_server_span(
        &self,
        name: &str,
        parent: Option<CorrelationContext>,
        attributes: &[(&'static str, String)],
    ) -> Result<Box<dyn ServerSpan>, SinkError> {
        let parent_cx = match parent {
            Some(p) if p.is_valid() => Context::new().with_remote_span_context(p.to_span_context(true)),
            _ => Context::new(),
        };

        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes(
                attributes
                    .iter()
                    .map(|(k, v)| KeyValue::new(*k, v.clone()))
                    .collect::<Vec<_>>(),
            )
            .start_with_context(&self.tracer, &parent_cx);

        Ok(Box::new(OtelSpan { span }))
    }
}

struct OtelSpan {
    span: sdktrace::Span,
}

impl ServerSpan for OtelSpan {
    fn correlation(&self) -> CorrelationContext {
        CorrelationContext::from_span_context(self.span.span_context())
    }

    fn set_status_code(&mut self, code: u16) {
        self.span
            .set_attribute(KeyValue::new("http.status_code", i64::from(code)));
    }

    fn set_error(&mut self, description: &str) {
        self.span.set_status(Status::error(description.to_string()));
    }

    fn end(&mut self) {
        self.span.end();
    }
}

pub struct OtelLogs {
    logger: Logger,
}

impl From<Severity> for OtelSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Trace => OtelSeverity::Trace,
            Severity::Debug => OtelSeverity::Debug,
            Severity::Info => OtelSeverity::Info,
            Severity::Warn => OtelSeverity::Warn,
            Severity::Error => OtelSeverity::Error,
            Severity::Fatal => OtelSeverity::Fatal,
        }
    }
}

impl LogSink for OtelLogs {
    fn emit(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        let mut log = self.logger.create_log_record();
        log.set_timestamp(record.timestamp());
        log.set_observed_timestamp(record.observed_timestamp());
        log.set_severity_number(record.severity.into());
        log.set_severity_text(record.severity.as_str());
        log.set_body(AnyValue::from(record.body));
        for (key, value) in record.attributes {
            log.add_attribute(key, value);
        }
        if record.correlation.is_valid() {
            log.set_trace_context(
                record.correlation.trace_id,
                record.correlation.span_id,
                Some(record.correlation.trace_flags()),
            );
        }
        self.logger.emit(log);
        Ok(())
    }
}

pub struct OtelMetrics {
    requests: Counter<u64>,
    latency: Histogram<f64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        let requests = meter
            .u64_counter(REQUEST_COUNT)
            .with_unit("1")
            .with_description("Total number of API requests")
            .build();

        let latency = meter
            .f64_histogram(REQUEST_LATENCY_SECONDS)
            .with_unit("s")
            .with_description("Latency of API requests")
            .build();

        Self { requests, latency }
    }
}

fn key_values(labels: &MetricLabels) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(k, v)| KeyValue::new(*k, v.clone()))
        .collect()
}

impl MetricsSink for OtelMetrics {
    fn increment_requests(&self, labels: &MetricLabels) -> Result<(), SinkError> {
        self.requests.add(1, &key_values(labels));
        Ok(())
    }

    fn observe_latency(&self, seconds: f64, labels: &MetricLabels) -> Result<(), SinkError> {
        self.latency.record(seconds, &key_values(labels));
        Ok(())
    }
}
