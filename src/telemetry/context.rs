//! Correlation identifiers shared by the span, log record and response of a
//! single request.

use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

/// Trace id, span id and sampled flag of the request's server span.
///
/// Created when the span opens and copied (never mutated) into every record
/// emitted for the request. [`CorrelationContext::NONE`] is the valid
/// degraded state when no tracer is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl CorrelationContext {
    pub const NONE: Self = Self {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        sampled: false,
    };

    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    pub fn from_span_context(span_context: &SpanContext) -> Self {
        if !span_context.is_valid() {
            return Self::NONE;
        }
        Self {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
            sampled: span_context.is_sampled(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    pub fn trace_flags(&self) -> TraceFlags {
        if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        }
    }

    pub fn to_span_context(&self, is_remote: bool) -> SpanContext {
        SpanContext::new(
            self.trace_id,
            self.span_id,
            self.trace_flags(),
            is_remote,
            TraceState::default(),
        )
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_zero_context() {
        let ctx = CorrelationContext::default();
        assert_eq!(ctx, CorrelationContext::NONE);
        assert!(!ctx.is_valid());
        assert!(!ctx.sampled);
        assert_eq!(ctx.trace_flags(), TraceFlags::default());
    }

    #[test]
    fn test_invalid_span_context_maps_to_none() {
        let ctx = CorrelationContext::from_span_context(&SpanContext::empty_context());
        assert_eq!(ctx, CorrelationContext::NONE);
    }

    #[test]
    fn test_span_context_round_trip_keeps_ids_and_flags() {
        let ctx = CorrelationContext::new(
            TraceId::from_bytes(7u128.to_be_bytes()),
            SpanId::from_bytes(9u64.to_be_bytes()),
            true,
        );
        let span_context = ctx.to_span_context(true);
        assert!(span_context.is_remote());
        assert!(span_context.is_sampled());
        assert_eq!(CorrelationContext::from_span_context(&span_context), ctx);
    }
}
