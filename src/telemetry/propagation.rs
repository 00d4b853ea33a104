//! W3C Trace Context propagation over HTTP headers.
//!
//! Inbound `traceparent` becomes the parent of the request's server span;
//! the server span's own context is written back on the response so callers
//! can find the trace.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

use super::CorrelationContext;

/// Remote parent carried by the request, if any.
pub fn extract_parent(headers: &HeaderMap) -> Option<CorrelationContext> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    let parent = CorrelationContext::from_span_context(cx.span().span_context());
    parent.is_valid().then_some(parent)
}

/// Writes `traceparent` for `correlation`; the zero context writes nothing.
pub fn inject(correlation: &CorrelationContext, headers: &mut HeaderMap) {
    if !correlation.is_valid() {
        return;
    }
    let cx = Context::new().with_remote_span_context(correlation.to_span_context(false));
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!("Failed to create header name for trace injection: {:?}", e);
                return;
            }
        };
        let val = match HeaderValue::from_str(&value) {
            Ok(val) => val,
            Err(e) => {
                tracing::debug!("Failed to create header value for trace injection: {:?}", e);
                return;
            }
        };
        self.0.insert(name, val);
    }
}
