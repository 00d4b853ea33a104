//! In-process sinks that keep everything they receive.
//!
//! Used by the test suites to assert on exact emissions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use opentelemetry::trace::{SpanId, TraceId};

use super::sinks::{
    LogSink, MetricLabels, MetricsSink, ServerSpan, SinkError, TelemetryRecord, TraceSink,
};
use super::{CorrelationContext, SinkFailurePolicy, Telemetry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSpan {
    pub name: String,
    pub parent: Option<CorrelationContext>,
    pub correlation: CorrelationContext,
    pub attributes: BTreeMap<String, String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct MemoryTraces {
    next_id: Arc<AtomicU64>,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl Default for MemoryTraces {
    fn default() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            finished: Arc::default(),
        }
    }
}

impl MemoryTraces {
    pub fn finished(&self) -> Vec<FinishedSpan> {
        lock(&self.finished).clone()
    }
}

impl TraceSink for MemoryTraces {
    fn start_server_span(
        &self,
        name: &str,
        parent: Option<CorrelationContext>,
        attributes: &[(&'static str, String)],
    ) -> Result<Box<dyn ServerSpan>, SinkError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let trace_id = match parent {
            Some(p) if p.is_valid() => p.trace_id,
            _ => TraceId::from_bytes(u128::from(id).to_be_bytes()),
        };

        Ok(Box::new(MemorySpan {
            span: FinishedSpan {
                name: name.to_string(),
                parent,
                correlation: CorrelationContext::new(
                    trace_id,
                    SpanId::from_bytes(id.to_be_bytes()),
                    true,
                ),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                status_code: None,
                error: None,
            },
            sink: self.finished.clone(),
            ended: false,
        }))
    }
}

struct MemorySpan {
    span: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
    ended: bool,
}

impl ServerSpan for MemorySpan {
    fn correlation(&self) -> CorrelationContext {
        self.span.correlation
    }

    fn set_status_code(&mut self, code: u16) {
        self.span.status_code = Some(code);
        self.span
            .attributes
            .insert("http.status_code".to_string(), code.to_string());
    }

    fn set_error(&mut self, description: &str) {
        self.span.error = Some(description.to_string());
    }

    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            lock(&self.sink).push(self.span.clone());
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryLogs {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
}

impl MemoryLogs {
    pub fn records(&self) -> Vec<TelemetryRecord> {
        lock(&self.records).clone()
    }
}

impl LogSink for MemoryLogs {
    fn emit(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        lock(&self.records).push(record);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    RequestCount {
        labels: BTreeMap<String, String>,
    },
    Latency {
        seconds: f64,
        labels: BTreeMap<String, String>,
    },
}

impl MetricEvent {
    pub fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            MetricEvent::RequestCount { labels } | MetricEvent::Latency { labels, .. } => labels,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryMetrics {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl MemoryMetrics {
    pub fn events(&self) -> Vec<MetricEvent> {
        lock(&self.events).clone()
    }

    pub fn request_counts(&self) -> Vec<BTreeMap<String, String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::RequestCount { labels } => Some(labels),
                MetricEvent::Latency { .. } => None,
            })
            .collect()
    }

    pub fn latencies(&self) -> Vec<(f64, BTreeMap<String, String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::Latency { seconds, labels } => Some((seconds, labels)),
                MetricEvent::RequestCount { .. } => None,
            })
            .collect()
    }
}

fn owned_labels(labels: &MetricLabels) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

impl MetricsSink for MemoryMetrics {
    fn increment_requests(&self, labels: &MetricLabels) -> Result<(), SinkError> {
        lock(&self.events).push(MetricEvent::RequestCount {
            labels: owned_labels(labels),
        });
        Ok(())
    }

    fn observe_latency(&self, seconds: f64, labels: &MetricLabels) -> Result<(), SinkError> {
        lock(&self.events).push(MetricEvent::Latency {
            seconds,
            labels: owned_labels(labels),
        });
        Ok(())
    }
}

/// One recording sink per signal, sharing storage with every clone.
#[derive(Clone, Default)]
pub struct TelemetryCapture {
    pub traces: MemoryTraces,
    pub logs: MemoryLogs,
    pub push: MemoryMetrics,
    pub pull: MemoryMetrics,
}

impl TelemetryCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry::builder()
            .traces(self.traces.clone())
            .logs(self.logs.clone())
            .push_metrics(self.push.clone())
            .pull_metrics(self.pull.clone())
            .failure_policy(SinkFailurePolicy::Warn)
            .build()
    }
}
