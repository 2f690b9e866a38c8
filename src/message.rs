// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages in Flight
//!
//! A [`SourceMessage`] is the opaque handle a source queue client returns from
//! a fetch. Listeners wrap it in an [`InFlightMessage`] tagged with the queue it
//! came from, and the dispatcher hands it to the handler as a [`Delivery`].

use crate::errors::ListenerError;
use async_trait::async_trait;
use opentelemetry::Context;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, fmt};
use tracing::warn;

/// A message fetched from a source queue and not yet acknowledged.
#[async_trait]
pub trait SourceMessage: Send + Sync {
    /// Identity of the message as known by the remote service.
    fn id(&self) -> &str;

    /// Raw payload.
    fn body(&self) -> &[u8];

    /// String attributes carried with the message, trace context included.
    fn attributes(&self) -> &HashMap<String, String>;

    /// Deletes the message from its source queue so it is never redelivered.
    async fn acknowledge(&self) -> Result<(), ListenerError>;

    /// Gives the message back to its source queue without acknowledging it.
    ///
    /// With `requeue` the source may redeliver it right away; without it the
    /// source's dead-letter policy applies. Sources that redeliver on their
    /// own, after a visibility timeout, need nothing here.
    async fn release(&self, _requeue: bool) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// A message occupying, or on its way to, a bus slot.
pub struct InFlightMessage {
    source_queue: String,
    message: Box<dyn SourceMessage>,
}

impl InFlightMessage {
    pub fn new(source_queue: &str, message: Box<dyn SourceMessage>) -> InFlightMessage {
        InFlightMessage {
            source_queue: source_queue.to_owned(),
            message,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.source_queue
    }

    pub fn message(&self) -> &dyn SourceMessage {
        self.message.as_ref()
    }

    /// Releases the message, logging instead of failing.
    pub async fn release(&self, requeue: bool) {
        release(self.message(), requeue).await
    }
}

pub(crate) async fn release(message: &dyn SourceMessage, requeue: bool) {
    if let Err(err) = message.release(requeue).await {
        warn!(error = %err, id = message.id(), requeue, "failure to release message");
    }
}

impl fmt::Debug for InFlightMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightMessage")
            .field("source_queue", &self.source_queue)
            .field("id", &self.message.id())
            .finish()
    }
}

/// What the handler sees of a message: where it came from and its content.
///
/// `context` carries the consumer span of this delivery, for handlers that
/// start spans of their own.
#[derive(Clone, Copy)]
pub struct Delivery<'d> {
    pub queue_name: &'d str,
    pub bus_name: &'d str,
    pub priority: i32,
    pub message: &'d dyn SourceMessage,
    pub context: &'d Context,
}

impl<'d> Delivery<'d> {
    pub fn id(&self) -> &'d str {
        self.message.id()
    }

    pub fn body(&self) -> &'d [u8] {
        self.message.body()
    }

    /// Decodes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.message.body())
    }
}

impl fmt::Debug for Delivery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue_name", &self.queue_name)
            .field("bus_name", &self.bus_name)
            .field("priority", &self.priority)
            .field("id", &self.message.id())
            .finish()
    }
}
