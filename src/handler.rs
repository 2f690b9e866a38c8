// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handler
//!
//! The single user supplied callback the dispatcher feeds. It is called for at
//! most one message at a time across all buses and is never re-entered.

use crate::{errors::BoxError, message::Delivery};
use async_trait::async_trait;

/// Handles one delivered message.
///
/// `Ok(())` acknowledges the message at its source queue. An error leaves it
/// unacknowledged, so the source queue's own redelivery or dead-letter policy
/// decides its fate.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery<'_>) -> Result<(), BoxError>;
}

/// Adapter turning a plain closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps a synchronous closure as a handler.
///
/// # Parameters
/// * `f` - Called with every delivery; an error releases the message unacknowledged
///
/// ```
/// use bus_listener::handler::{handler_fn, MessageHandler};
///
/// let handler = handler_fn(|delivery| {
///     tracing::info!(queue = delivery.queue_name, "got {}", delivery.id());
///     Ok(())
/// });
/// let _: &dyn MessageHandler = &handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Delivery<'_>) -> Result<(), BoxError> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Delivery<'_>) -> Result<(), BoxError> + Send + Sync,
{
    async fn handle(&self, delivery: &Delivery<'_>) -> Result<(), BoxError> {
        (self.f)(delivery)
    }
}
