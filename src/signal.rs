// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Shared Signals
//!
//! Two process wide flags coordinate listeners with the dispatcher, each with a
//! single writer:
//! - the run signal ([`Shutdown`] / [`ShutdownSignal`]), written by whoever
//!   requests shutdown
//! - the handler availability signal ([`Availability`] / [`AvailabilityGate`]),
//!   written only by the dispatcher while it runs the handler

use tokio::sync::watch;

/// Writer side of the run signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Reader side of the run signal. Dropping the [`Shutdown`] counts as a trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Shutdown, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Shutdown { tx }, ShutdownSignal { rx })
    }

    /// Requests shutdown of everything holding a signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Dispatcher side of the handler availability signal.
#[derive(Debug)]
pub struct Availability {
    tx: watch::Sender<bool>,
}

/// Listener side of the handler availability signal.
#[derive(Debug, Clone)]
pub struct AvailabilityGate {
    rx: watch::Receiver<bool>,
}

impl Availability {
    pub fn new() -> Availability {
        let (tx, _) = watch::channel(true);
        Availability { tx }
    }

    pub fn gate(&self) -> AvailabilityGate {
        AvailabilityGate {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn set_busy(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) fn set_available(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityGate {
    /// Waits while the dispatcher is running the handler.
    pub async fn wait(&mut self) {
        // a dropped dispatcher never blocks listeners; shutdown stops them instead
        let _ = self.rx.wait_for(|available| *available).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn trigger_wakes_every_signal() {
        let (shutdown, mut first) = Shutdown::new();
        let mut second = shutdown.signal();
        assert!(!first.is_triggered());

        shutdown.trigger();

        timeout(Duration::from_millis(100), first.triggered()).await.unwrap();
        timeout(Duration::from_millis(100), second.triggered()).await.unwrap();
        assert!(second.is_triggered());
    }

    #[tokio::test]
    async fn dropping_shutdown_counts_as_trigger() {
        let (shutdown, mut signal) = Shutdown::new();
        drop(shutdown);

        assert!(signal.is_triggered());
        timeout(Duration::from_millis(100), signal.triggered()).await.unwrap();
    }

    #[tokio::test]
    async fn gate_blocks_while_busy() {
        let availability = Availability::new();
        let mut gate = availability.gate();

        timeout(Duration::from_millis(50), gate.wait()).await.unwrap();

        availability.set_busy();
        assert!(!availability.is_available());
        assert!(timeout(Duration::from_millis(50), gate.wait()).await.is_err());

        availability.set_available();
        timeout(Duration::from_millis(50), gate.wait()).await.unwrap();
    }
}
