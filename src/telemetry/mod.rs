//! Observability: the four telemetry sinks, their OTLP and Prometheus
//! backends, W3C propagation and the local log subscriber.
//!
//! Nothing here installs process-global providers. [`init_telemetry`] builds
//! a [`Telemetry`] bundle that is handed to the instrumentation explicitly.

pub mod context;
pub mod memory;
pub mod metrics;
pub mod otel;
pub mod propagation;
pub mod sinks;
pub mod tracing;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ::tracing::{info, warn};
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;

pub use context::CorrelationContext;
pub use memory::TelemetryCapture;
pub use self::metrics::{metrics_handler, MetricsState, PrometheusMetrics, UPKEEP_INTERVAL};
pub use otel::OtelProviders;
pub use sinks::{
    LogSink, MetricsSink, NoopLogSink, NoopMetricsSink, NoopTraceSink, ServerSpan, Severity,
    SinkError, TelemetryRecord, TraceSink,
};
pub use self::tracing::init_tracing;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build {signal} exporter: {message}")]
    Exporter {
        signal: &'static str,
        message: String,
    },

    #[error("failed to build metrics registry: {0}")]
    Registry(String),
}

impl TelemetryError {
    pub fn exporter(signal: &'static str, e: impl fmt::Display) -> Self {
        TelemetryError::Exporter {
            signal,
            message: e.to_string(),
        }
    }
}

/// What to do when a sink rejects an emission. The request itself is never
/// affected either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkFailurePolicy {
    Ignore,
    #[default]
    Warn,
}

impl FromStr for SinkFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(SinkFailurePolicy::Ignore),
            "warn" => Ok(SinkFailurePolicy::Warn),
            other => Err(format!("unknown sink failure policy: {}", other)),
        }
    }
}

/// The sinks a request is instrumented into. Cheap to clone.
#[derive(Clone)]
pub struct Telemetry {
    pub traces: Arc<dyn TraceSink>,
    pub logs: Arc<dyn LogSink>,
    pub push_metrics: Arc<dyn MetricsSink>,
    pub pull_metrics: Arc<dyn MetricsSink>,
    pub failure_policy: SinkFailurePolicy,
}

impl Telemetry {
    /// Every sink a no-op; handlers still run and the correlation context is
    /// the zero context.
    pub fn disabled() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TelemetryBuilder {
        TelemetryBuilder::default()
    }

    pub(crate) fn report(&self, result: Result<(), SinkError>) {
        if let Err(e) = result {
            if self.failure_policy == SinkFailurePolicy::Warn {
                warn!(sink = e.sink, error = %e.message, "Telemetry sink failed");
            }
        }
    }
}

#[derive(Default)]
pub struct TelemetryBuilder {
    traces: Option<Arc<dyn TraceSink>>,
    logs: Option<Arc<dyn LogSink>>,
    push_metrics: Option<Arc<dyn MetricsSink>>,
    pull_metrics: Option<Arc<dyn MetricsSink>>,
    failure_policy: SinkFailurePolicy,
}

impl TelemetryBuilder {
    pub fn traces(mut self, sink: impl TraceSink + 'static) -> Self {
        self.traces = Some(Arc::new(sink));
        self
    }

    pub fn logs(mut self, sink: impl LogSink + 'static) -> Self {
        self.logs = Some(Arc::new(sink));
        self
    }

    pub fn push_metrics(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.push_metrics = Some(Arc::new(sink));
        self
    }

    pub fn pull_metrics(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.pull_metrics = Some(Arc::new(sink));
        self
    }

    pub fn failure_policy(mut self, policy: SinkFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn build(self) -> Telemetry {
        Telemetry {
            traces: self.traces.unwrap_or_else(|| Arc::new(NoopTraceSink)),
            logs: self.logs.unwrap_or_else(|| Arc::new(NoopLogSink)),
            push_metrics: self.push_metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)),
            pull_metrics: self.pull_metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)),
            failure_policy: self.failure_policy,
        }
    }
}

pub struct InitializedTelemetry {
    pub telemetry: Telemetry,
    pub metrics: MetricsState,
    pub guard: TelemetryGuard,
}

/// Builds the sinks described by `config`.
///
/// OTLP export is skipped when no endpoint is configured, the Prometheus
/// registry when metrics are disabled. Must run inside a Tokio runtime
/// because the batch exporters and the registry upkeep task spawn onto it.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<InitializedTelemetry, TelemetryError> {
    let mut builder = Telemetry::builder().failure_policy(config.sink_failures);

    let providers = match &config.otlp_endpoint {
        Some(endpoint) => {
            let providers = OtelProviders::install(
                endpoint,
                &config.service_name,
                Duration::from_secs(config.metric_export_interval_secs),
            )?;
            builder = builder
                .traces(providers.traces())
                .logs(providers.logs())
                .push_metrics(providers.push_metrics());
            info!(endpoint = %endpoint, service = %config.service_name, "OTLP export enabled");
            Some(providers)
        }
        None => {
            info!("OTLP export disabled");
            None
        }
    };

    let (metrics, upkeep) = if config.metrics_enabled {
        let registry = PrometheusMetrics::new()?;
        let state = MetricsState::new(&registry);
        let upkeep = registry.spawn_upkeep(UPKEEP_INTERVAL);
        builder = builder.pull_metrics(registry);
        (state, Some(upkeep))
    } else {
        (MetricsState::disabled(), None)
    };

    Ok(InitializedTelemetry {
        telemetry: builder.build(),
        metrics,
        guard: TelemetryGuard { providers, upkeep },
    })
}

/// Flushes and stops the OTLP providers and the registry upkeep task. Shut
/// down explicitly after the server has drained; dropping the guard does
/// the same as a fallback.
pub struct TelemetryGuard {
    providers: Option<OtelProviders>,
    upkeep: Option<JoinHandle<()>>,
}

impl TelemetryGuard {
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn has_upkeep(&self) -> bool {
        self.upkeep.is_some()
    }

    fn stop(&mut self) {
        if let Some(upkeep) = self.upkeep.take() {
            upkeep.abort();
        }
        if let Some(providers) = self.providers.take() {
            providers.shutdown();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
