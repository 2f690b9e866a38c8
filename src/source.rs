// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Source Queue Client Interface
//!
//! The listener does not speak any queueing protocol itself. A [`SourceConnector`]
//! resolves each configured queue into a [`SourceQueue`] at startup, and listeners
//! only ever fetch through that trait. Acknowledgment lives on the fetched
//! [`SourceMessage`](crate::message::SourceMessage).

use crate::{config::QueueConfig, errors::ListenerError, message::SourceMessage};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Maximum number of messages a listener asks for in one fetch.
pub const FETCH_MAX_COUNT: usize = 1;

/// A resolved remote queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceQueue: Send + Sync {
    /// Fetches up to `max_count` messages.
    ///
    /// With `wait` set, blocks up to that long for a message to arrive and
    /// returns as soon as one does. Without it, returns immediately. An empty
    /// vector means no message was available.
    async fn fetch(
        &self,
        max_count: usize,
        wait: Option<Duration>,
    ) -> Result<Vec<Box<dyn SourceMessage>>, ListenerError>;
}

/// Resolves queue configurations into source queues.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, queue: &QueueConfig) -> Result<Arc<dyn SourceQueue>, ListenerError>;
}
