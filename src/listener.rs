// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Listener Workers
//!
//! One worker per configured queue. A worker loops: wait until the dispatcher is
//! not running the handler and its bus is vacant, fetch one message, wait on the
//! same two gates again, then publish the message on its bus.
//!
//! Long polling workers let the fetch itself block for up to the configured
//! wait; short polling workers fetch without waiting and pause for the poll
//! interval after an empty fetch.
//!
//! A message fetched but never published, because shutdown came first or the
//! source returned more than asked for, is released back to its source.
//!
//! Fetch failures are not retried here: they end the worker and are returned
//! from [`ListenerWorker::run`] for the dispatcher to report.

use crate::{
    bus::Bus,
    config::{PollMode, QueueConfig},
    errors::ListenerError,
    message::{release, InFlightMessage},
    signal::{AvailabilityGate, ShutdownSignal},
    source::{SourceQueue, FETCH_MAX_COUNT},
};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct ListenerWorker {
    queue: QueueConfig,
    source: Arc<dyn SourceQueue>,
    bus: Arc<Bus>,
    gate: AvailabilityGate,
    shutdown: ShutdownSignal,
}

impl ListenerWorker {
    pub fn new(
        queue: QueueConfig,
        source: Arc<dyn SourceQueue>,
        bus: Arc<Bus>,
        gate: AvailabilityGate,
        shutdown: ShutdownSignal,
    ) -> ListenerWorker {
        ListenerWorker {
            queue,
            source,
            bus,
            gate,
            shutdown,
        }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Runs the poll loop until shutdown or a fetch failure.
    pub async fn run(mut self) -> Result<(), ListenerError> {
        let span = info_span!("listener", queue = %self.queue.name, bus = %self.bus.name());
        async move {
            let result = self.listen().await;
            match &result {
                Ok(()) => info!("listener stopped"),
                Err(err) => error!(error = %err, "listener terminated"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn listen(&mut self) -> Result<(), ListenerError> {
        let mode = self.queue.poll_mode();
        let wait = match mode {
            PollMode::LongPoll { wait } => Some(wait),
            PollMode::ShortPoll { .. } => None,
        };
        info!(?mode, "polling queue");

        while !self.shutdown.is_triggered() {
            if !self.ready().await {
                break;
            }

            let mut fetched = self
                .source
                .fetch(FETCH_MAX_COUNT, wait)
                .await?
                .into_iter();

            let Some(message) = fetched.next() else {
                if let PollMode::ShortPoll { interval } = mode {
                    tokio::select! {
                        _ = self.shutdown.triggered() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                continue;
            };

            let extra: Vec<_> = fetched.collect();
            if !extra.is_empty() {
                warn!(
                    extra = extra.len(),
                    "source returned more messages than requested, releasing extras"
                );
                for message in &extra {
                    release(message.as_ref(), true).await;
                }
            }

            let message = InFlightMessage::new(self.queue.name(), message);
            if !self.ready().await {
                debug!(id = message.message().id(), "shutdown before publish, releasing message");
                message.release(true).await;
                break;
            }

            let reserved = tokio::select! {
                _ = self.shutdown.triggered() => None,
                reserved = self.bus.channel().reserve() => Some(reserved?),
            };
            match reserved {
                Some(reservation) => reservation.fill(message),
                None => {
                    debug!(id = message.message().id(), "shutdown before publish, releasing message");
                    message.release(true).await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Waits for handler availability, then for the bus to be vacant.
    ///
    /// # Returns
    /// false if shutdown was requested while waiting
    async fn ready(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => return false,
            _ = self.gate.wait() => {}
        }

        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => false,
            _ = self.bus.channel().wait_vacant() => true,
        }
    }
}
