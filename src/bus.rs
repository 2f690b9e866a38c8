// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Priority Buses
//!
//! A [`Bus`] groups one or more source queues under a name and a priority. Its
//! [`BusChannel`] is the rendezvous between the listeners of those queues and the
//! dispatcher: it holds at most one message, and the slot only becomes
//! available again once the dispatcher has called [`BusChannel::mark_done`] for
//! the message it took.

use crate::{errors::ListenerError, message::InFlightMessage};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tracing::debug;

/// Depth-1 handoff between many producers and a single consumer.
///
/// The single semaphore permit stands for the slot: `put` consumes it and only
/// `mark_done` gives it back, so a taken but unfinished message still blocks
/// producers.
pub struct BusChannel {
    bus: String,
    capacity: Semaphore,
    slot: Mutex<Option<InFlightMessage>>,
    awaiting_done: AtomicBool,
    arrivals: Arc<Notify>,
}

impl BusChannel {
    fn new(bus: &str, arrivals: Arc<Notify>) -> BusChannel {
        BusChannel {
            bus: bus.to_owned(),
            capacity: Semaphore::new(1),
            slot: Mutex::new(None),
            awaiting_done: AtomicBool::new(false),
            arrivals,
        }
    }

    /// Places a message in the slot, waiting until the slot is empty and the
    /// previous message has been marked done.
    ///
    /// Cancel safe: dropping the future before it completes leaves the channel
    /// untouched; the message is dropped unacknowledged. Use [`reserve`] to
    /// keep the message when the wait is abandoned.
    ///
    /// [`reserve`]: BusChannel::reserve
    pub async fn put(&self, message: InFlightMessage) -> Result<(), ListenerError> {
        self.reserve().await?.fill(message);
        Ok(())
    }

    /// Waits for the slot and holds it until the reservation is filled or dropped.
    ///
    /// Cancel safe: nothing is reserved until the future completes.
    ///
    /// # Returns
    /// The reservation, or `InternalError` if the channel was closed
    pub async fn reserve(&self) -> Result<SlotReservation<'_>, ListenerError> {
        let permit = self
            .capacity
            .acquire()
            .await
            .map_err(|_| ListenerError::InternalError)?;

        Ok(SlotReservation {
            channel: self,
            permit,
        })
    }

    /// Takes the current occupant, if any, without waiting.
    pub fn try_take(&self) -> Option<InFlightMessage> {
        let message = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if message.is_some() {
            self.awaiting_done.store(true, Ordering::SeqCst);
        }
        message
    }

    /// Releases the slot after the taken message was handled, successfully or not.
    pub fn mark_done(&self) -> Result<(), ListenerError> {
        if !self.awaiting_done.swap(false, Ordering::SeqCst) {
            return Err(ListenerError::BusSlotNotTaken(self.bus.clone()));
        }

        self.capacity.add_permits(1);
        Ok(())
    }

    /// Waits until a `put` could proceed, without reserving the slot.
    pub async fn wait_vacant(&self) {
        let _ = self.capacity.acquire().await;
    }

    /// True when no message is held or awaiting completion.
    pub fn is_vacant(&self) -> bool {
        self.capacity.available_permits() > 0
    }
}

/// Exclusive right to fill a vacant [`BusChannel`]. Dropping it frees the slot.
pub struct SlotReservation<'c> {
    channel: &'c BusChannel,
    permit: SemaphorePermit<'c>,
}

impl SlotReservation<'_> {
    pub fn fill(self, message: InFlightMessage) {
        let channel = self.channel;
        let mut slot = channel.slot.lock().unwrap_or_else(|e| e.into_inner());
        debug!(bus = %channel.bus, queue = message.queue_name(), "message published");
        *slot = Some(message);
        drop(slot);

        self.permit.forget();
        channel.arrivals.notify_one();
    }
}

/// A named, priority tagged bus.
pub struct Bus {
    name: String,
    priority: i32,
    channel: BusChannel,
}

impl Bus {
    pub fn new(name: &str, priority: i32) -> Bus {
        Self::with_arrivals(name, priority, Arc::new(Notify::new()))
    }

    pub(crate) fn with_arrivals(name: &str, priority: i32, arrivals: Arc<Notify>) -> Bus {
        Bus {
            name: name.to_owned(),
            priority,
            channel: BusChannel::new(name, arrivals),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn channel(&self) -> &BusChannel {
        &self.channel
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.priority)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("vacant", &self.channel.is_vacant())
            .finish()
    }
}
