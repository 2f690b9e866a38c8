// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module provides the trace span wrapped around every handler invocation.
//! The parent context is extracted from the string attributes carried by the
//! message, so a trace started by the producer continues through the handler.

use crate::{bus::Bus, message::InFlightMessage};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::Extractor,
    trace::{SpanKind, Tracer},
    Context, KeyValue,
};
use std::{borrow::Cow, collections::HashMap};

/// Name of the tracer used by the dispatcher
pub const TRACER_NAME: &str = "bus dispatcher";

/// Read-only view of message attributes for context extraction.
pub(crate) struct AttributesExtractor<'a> {
    attributes: &'a HashMap<String, String>,
}

impl<'a> AttributesExtractor<'a> {
    pub(crate) fn new(attributes: &'a HashMap<String, String>) -> Self {
        Self { attributes }
    }
}

impl Extractor for AttributesExtractor<'_> {
    /// Looks a propagation key up, ignoring case as header based transports do.
    fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }
}

/// Creates the consumer span for a message taken from `bus`.
///
/// # Parameters
/// * `message` - The message about to be handled
/// * `bus` - The bus it was taken from
/// * `tracer` - OpenTelemetry tracer
///
/// # Returns
/// A tuple containing the extracted parent context and the started span
pub fn new_span(message: &InFlightMessage, bus: &Bus, tracer: &BoxedTracer) -> (Context, BoxedSpan) {
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&AttributesExtractor::new(message.message().attributes()))
    });

    let span = tracer
        .span_builder(Cow::from(bus.name().to_owned()))
        .with_kind(SpanKind::Consumer)
        .with_attributes(vec![
            KeyValue::new("messaging.source.name", message.queue_name().to_owned()),
            KeyValue::new("messaging.message.id", message.message().id().to_owned()),
            KeyValue::new("bus.name", bus.name().to_owned()),
            KeyValue::new("bus.priority", bus.priority() as i64),
        ])
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
