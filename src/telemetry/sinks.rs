//! Interfaces of the telemetry backends the instrumentation emits into.
//!
//! Sinks own delivery (batching, export, aggregation) and their own
//! synchronization; callers hand them finished values and never inspect
//! their state.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::CorrelationContext;

/// `(label name, label value)` pairs in emission order.
pub type MetricLabels = [(&'static str, String)];

#[derive(Debug, thiserror::Error)]
#[error("{sink} sink failed: {message}")]
pub struct SinkError {
    pub sink: &'static str,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: &'static str, message: impl Into<String>) -> Self {
        Self {
            sink,
            message: message.into(),
        }
    }
}

pub trait TraceSink: Send + Sync {
    /// Opens a server-kind span, as a child of `parent` when one is given.
    fn start_server_span(
        &self,
        name: &str,
        parent: Option<CorrelationContext>,
        attributes: &[(&'static str, String)],
    ) -> Result<Box<dyn ServerSpan>, SinkError>;
}

/// An open span. Ended exactly once by its owner.
pub trait ServerSpan: Send {
    fn correlation(&self) -> CorrelationContext;
    fn set_status_code(&mut self, code: u16);
    fn set_error(&mut self, description: &str);
    fn end(&mut self);
}

pub trait LogSink: Send + Sync {
    fn emit(&self, record: TelemetryRecord) -> Result<(), SinkError>;
}

pub trait MetricsSink: Send + Sync {
    fn increment_requests(&self, labels: &MetricLabels) -> Result<(), SinkError>;
    fn observe_latency(&self, seconds: f64, labels: &MetricLabels) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// Structured log entry correlated with the request's span.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp_nanos: u64,
    pub observed_timestamp_nanos: u64,
    pub severity: Severity,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub correlation: CorrelationContext,
}

impl TelemetryRecord {
    /// Stamps both timestamps at the moment of construction; build the record
    /// immediately before emitting it.
    pub fn now(
        severity: Severity,
        body: impl Into<String>,
        attributes: BTreeMap<String, String>,
        correlation: CorrelationContext,
    ) -> Self {
        let timestamp_nanos = unix_nanos();
        let observed_timestamp_nanos = unix_nanos();
        Self {
            timestamp_nanos,
            observed_timestamp_nanos,
            severity,
            body: body.into(),
            attributes,
            correlation,
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp_nanos)
    }

    pub fn observed_timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.observed_timestamp_nanos)
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn start_server_span(
        &self,
        _name: &str,
        _parent: Option<CorrelationContext>,
        _attributes: &[(&'static str, String)],
    ) -> Result<Box<dyn ServerSpan>, SinkError> {
        Ok(Box::new(NoopSpan))
    }
}

pub struct NoopSpan;

impl ServerSpan for NoopSpan {
    fn correlation(&self) -> CorrelationContext {
        CorrelationContext::NONE
    }

    fn set_status_code(&mut self, _code: u16) {}

    fn set_error(&mut self, _description: &str) {}

    fn end(&mut self) {}
}

pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn emit(&self, _record: TelemetryRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment_requests(&self, _labels: &MetricLabels) -> Result<(), SinkError> {
        Ok(())
    }

    fn observe_latency(&self, _seconds: f64, _labels: &MetricLabels) -> Result<(), SinkError> {
        Ok(())
    }
}
