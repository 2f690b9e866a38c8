// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Priority Dispatcher
//!
//! This module provides the single control loop of the listener. It starts one
//! [`ListenerWorker`] per configured queue, then repeatedly scans the buses from
//! highest to lowest priority and hands the first message it finds to the
//! handler. After every handled message, successful or not, the scan restarts
//! from the top, so a pending message on a higher priority bus is always served
//! before a lower priority bus gets a second look.
//!
//! The handler is invoked for one message at a time. While it runs, the
//! availability signal is cleared so listeners stop fetching.

use crate::{
    bus::Bus,
    config::ListenerConfig,
    errors::ListenerError,
    handler::MessageHandler,
    listener::ListenerWorker,
    message::{Delivery, InFlightMessage},
    otel,
    registry::BusRegistry,
    signal::{Availability, Shutdown, ShutdownSignal},
    source::{SourceConnector, SourceQueue},
};
use futures_util::FutureExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Status, TraceContextExt},
};
use std::{
    any::Any,
    borrow::Cow,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// What happened to a message handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler succeeded and the message was deleted from its source queue.
    Acknowledged,
    /// The handler failed or panicked; the message was released unacknowledged.
    HandlerFailed,
    /// The handler succeeded but deleting the message failed.
    AckFailed,
}

/// Summary returned by [`Dispatcher::run`] once every listener has stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub acknowledged: usize,
    pub handler_failures: usize,
    pub ack_failures: usize,
    /// Listeners that ended with an error, by queue name.
    pub failed_workers: Vec<(String, ListenerError)>,
}

impl ShutdownReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Acknowledged => self.acknowledged += 1,
            DispatchOutcome::HandlerFailed => self.handler_failures += 1,
            DispatchOutcome::AckFailed => self.ack_failures += 1,
        }
    }
}

type WorkerResult = Result<(), ListenerError>;

pub struct Dispatcher {
    config: ListenerConfig,
    registry: Arc<BusRegistry>,
    connector: Arc<dyn SourceConnector>,
    handler: Arc<dyn MessageHandler>,
    availability: Availability,
    tracer: BoxedTracer,
}

impl Dispatcher {
    /// Creates a dispatcher and its bus registry.
    ///
    /// # Parameters
    /// * `config` - Validated buses and queues
    /// * `connector` - Resolves each queue into a source queue client at startup
    /// * `handler` - Receives every message, one at a time
    pub fn new(
        config: ListenerConfig,
        connector: Arc<dyn SourceConnector>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Dispatcher, ListenerError> {
        let registry = Arc::new(BusRegistry::new(config.buses())?);

        Ok(Dispatcher {
            config,
            registry,
            connector,
            handler,
            availability: Availability::new(),
            tracer: global::tracer(otel::TRACER_NAME),
        })
    }

    pub fn registry(&self) -> &Arc<BusRegistry> {
        &self.registry
    }

    /// Starts every listener and dispatches until `shutdown` fires.
    ///
    /// Every queue is resolved through the connector before any listener
    /// starts; a resolution failure aborts startup. On shutdown the listeners
    /// are stopped and awaited before the report is returned.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<ShutdownReport, ListenerError> {
        let (listeners_shutdown, _) = Shutdown::new();
        let (mut workers, mut names) = self.start_listeners(&listeners_shutdown).await?;
        let mut report = ShutdownReport::default();

        info!(listeners = workers.len(), "listening to all queues");

        while !shutdown.is_triggered() {
            while let Some(joined) = workers.try_join_next_with_id() {
                record_worker(joined, &mut names, &mut report);
            }

            if let Some(outcome) = self.dispatch_next().await {
                report.record(outcome);
                continue;
            }

            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = self.registry.arrival() => {}
                _ = tokio::time::sleep(self.config.idle_wait) => {}
            }
        }

        info!("shutdown requested, stopping listeners");
        listeners_shutdown.trigger();
        while let Some(joined) = workers.join_next_with_id().await {
            record_worker(joined, &mut names, &mut report);
        }

        for bus in self.registry.iter() {
            if let Some(message) = bus.channel().try_take() {
                warn!(
                    queue = message.queue_name(),
                    bus = bus.name(),
                    id = message.message().id(),
                    "message left unhandled at shutdown, releasing it"
                );
                message.release(true).await;
                let _ = bus.channel().mark_done();
            }
        }

        info!(
            acknowledged = report.acknowledged,
            handler_failures = report.handler_failures,
            ack_failures = report.ack_failures,
            failed_listeners = report.failed_workers.len(),
            "dispatcher stopped"
        );
        Ok(report)
    }

    /// Performs one pass over the buses in priority order and dispatches the
    /// first message found.
    ///
    /// # Returns
    /// The outcome of the dispatched message, or None if every bus was empty
    pub async fn dispatch_next(&self) -> Option<DispatchOutcome> {
        for bus in self.registry.iter() {
            let Some(message) = bus.channel().try_take() else {
                continue;
            };
            return Some(self.dispatch(bus, message).await);
        }
        None
    }

    async fn start_listeners(
        &self,
        shutdown: &Shutdown,
    ) -> Result<(JoinSet<WorkerResult>, HashMap<Id, String>), ListenerError> {
        let mut resolved: Vec<(Arc<dyn SourceQueue>, Arc<Bus>)> = Vec::new();
        for queue in self.config.queues() {
            let bus = self
                .registry
                .get(queue.bus())
                .ok_or_else(|| ListenerError::UnknownBus {
                    queue: queue.name().to_owned(),
                    bus: queue.bus().to_owned(),
                })?;

            let source = self.connector.connect(queue).await.inspect_err(|err| {
                error!(error = %err, queue = queue.name(), "failure to resolve queue");
            })?;
            resolved.push((source, Arc::clone(bus)));
        }

        let mut workers = JoinSet::new();
        let mut names = HashMap::new();
        for (queue, (source, bus)) in self.config.queues().iter().zip(resolved) {
            debug!(
                queue = queue.name(),
                bus = bus.name(),
                mode = ?queue.poll_mode(),
                "launching listener"
            );
            let worker = ListenerWorker::new(
                queue.clone(),
                source,
                bus,
                self.availability.gate(),
                shutdown.signal(),
            );
            let handle = workers.spawn(worker.run());
            names.insert(handle.id(), queue.name().to_owned());
        }

        Ok((workers, names))
    }

    async fn dispatch(&self, bus: &Bus, message: InFlightMessage) -> DispatchOutcome {
        self.availability.set_busy();

        let (parent, span) = otel::new_span(&message, bus, &self.tracer);
        let ctx = parent.with_span(span);

        let delivery = Delivery {
            queue_name: message.queue_name(),
            bus_name: bus.name(),
            priority: bus.priority(),
            message: message.message(),
            context: &ctx,
        };

        debug!(
            queue = delivery.queue_name,
            bus = delivery.bus_name,
            priority = delivery.priority,
            id = delivery.id(),
            "dispatching message"
        );

        let handled = AssertUnwindSafe(self.handler.handle(&delivery))
            .catch_unwind()
            .await;

        let span = ctx.span();
        let outcome = match handled {
            Ok(Ok(())) => match delivery.message.acknowledge().await {
                Ok(()) => {
                    debug!("message successfully processed");
                    span.set_status(Status::Ok);
                    DispatchOutcome::Acknowledged
                }
                Err(err) => {
                    error!(
                        error = %err,
                        queue = delivery.queue_name,
                        bus = delivery.bus_name,
                        id = delivery.id(),
                        "error whiling ack msg"
                    );
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                    DispatchOutcome::AckFailed
                }
            },
            Ok(Err(err)) => {
                error!(
                    error = %err,
                    queue = delivery.queue_name,
                    bus = delivery.bus_name,
                    id = delivery.id(),
                    "unable to handle message, releasing it unacknowledged"
                );
                span.record_error(&*err);
                span.set_status(Status::Error {
                    description: Cow::from("handler failure"),
                });
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                let reason = panic_reason(&*panic);
                error!(
                    panic = %reason,
                    queue = delivery.queue_name,
                    bus = delivery.bus_name,
                    id = delivery.id(),
                    "handler panicked, releasing message unacknowledged"
                );
                span.set_status(Status::Error {
                    description: Cow::from(format!("handler panicked: {reason}")),
                });
                DispatchOutcome::HandlerFailed
            }
        };
        span.end();

        if outcome == DispatchOutcome::HandlerFailed {
            message.release(false).await;
        }

        if let Err(err) = bus.channel().mark_done() {
            error!(error = %err, "failure to release bus slot");
        }
        self.availability.set_available();

        outcome
    }
}

fn record_worker(
    joined: Result<(Id, WorkerResult), JoinError>,
    names: &mut HashMap<Id, String>,
    report: &mut ShutdownReport,
) {
    let (id, result) = match joined {
        Ok((id, result)) => (id, result),
        Err(err) => {
            let id = err.id();
            let queue = names.get(&id).cloned().unwrap_or_default();
            (id, Err(ListenerError::WorkerPanicked(queue)))
        }
    };
    let queue = names.remove(&id).unwrap_or_default();

    match result {
        Ok(()) => debug!(queue, "listener finished"),
        Err(err) => {
            error!(error = %err, queue, "listener lost, queue no longer serviced");
            report.failed_workers.push((queue, err));
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        warn!("handler panicked with a non string payload");
        "unknown".to_owned()
    }
}
