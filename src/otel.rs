// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Provides the `TraceContext` capability used by the correlation processor, an
//! adapter to inject and extract OpenTelemetry context through message headers, and
//! consumer span creation for delivered messages.

use crate::message::Headers;
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, TraceContextExt, Tracer},
    Context,
};
use serde_json::Value;
use std::borrow::Cow;

/// Source of the trace identifier of the current request, if any.
#[cfg_attr(test, mockall::automock)]
pub trait TraceContext: Send + Sync {
    fn current_trace_id(&self) -> Option<String>;
}

/// `TraceContext` backed by the active OpenTelemetry span.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelTraceContext;

impl TraceContext for OtelTraceContext {
    fn current_trace_id(&self) -> Option<String> {
        let cx = Context::current();
        let span = cx.span();
        let span_context = span.span_context();

        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    }
}

/// An adapter for injecting OpenTelemetry context into message headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut Headers,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), Value::String(value));
    }
}

/// An adapter for extracting OpenTelemetry context from message headers.
pub(crate) struct RabbitMQTraceExtractor<'a> {
    headers: &'a Headers,
}

impl<'a> RabbitMQTraceExtractor<'a> {
    pub(crate) fn new(headers: &'a Headers) -> Self {
        Self { headers }
    }
}

impl Extractor for RabbitMQTraceExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(Value::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Injects the current OpenTelemetry context into `headers`.
pub(crate) fn inject_context(headers: &mut Headers) {
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut RabbitMQTracePropagator::new(headers))
    });
}

/// Creates a consumer span for a delivered message, parented on the context
/// carried in its headers.
pub(crate) fn new_span(headers: &Headers, tracer: &BoxedTracer, name: &str) -> BoxedSpan {
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTraceExtractor::new(headers))
    });

    tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = Headers::new();
        RabbitMQTracePropagator::new(&mut headers).set("TraceParent", "00-abc".to_owned());

        assert_eq!(headers["traceparent"], Value::String("00-abc".to_owned()));
    }

    #[test]
    fn extractor_reads_string_headers_only() {
        let mut headers = Headers::new();
        headers.insert("traceparent".into(), Value::String("00-abc".into()));
        headers.insert("x-requeue-count".into(), Value::from(2));

        let extractor = RabbitMQTraceExtractor::new(&headers);

        assert_eq!(extractor.get("traceparent"), Some("00-abc"));
        assert_eq!(extractor.get("x-requeue-count"), None);
        assert_eq!(extractor.keys().len(), 2);
    }

    #[test]
    fn no_active_span_means_no_trace_id() {
        assert_eq!(OtelTraceContext.current_trace_id(), None);
    }
}
