// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use async_trait::async_trait;
use bus_listener::{
    config::{BusDefinition, ListenerConfig, QueueConfig},
    dispatcher::{Dispatcher, ShutdownReport},
    errors::{BoxError, ListenerError},
    handler::MessageHandler,
    memory::MemoryConnector,
    message::Delivery,
    signal::Shutdown,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    id: String,
    queue: String,
    bus: String,
    priority: i32,
    body: Vec<u8>,
}

/// Reports every delivery and rejects bodies equal to `bad`.
struct Collector {
    seen: mpsc::UnboundedSender<Seen>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: Arc<AtomicUsize>,
}

impl Collector {
    fn new() -> (Collector, mpsc::UnboundedReceiver<Seen>) {
        let (seen, rx) = mpsc::unbounded_channel();
        let collector = Collector {
            seen,
            gate: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: Arc::default(),
        };
        (collector, rx)
    }

    /// Every call waits for a permit of `gate` before returning.
    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl MessageHandler for Collector {
    async fn handle(&self, delivery: &Delivery<'_>) -> Result<(), BoxError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let _ = self.seen.send(Seen {
            id: delivery.id().to_owned(),
            queue: delivery.queue_name.to_owned(),
            bus: delivery.bus_name.to_owned(),
            priority: delivery.priority,
            body: delivery.body().to_vec(),
        });

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        } else {
            sleep(Duration::from_millis(5)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if delivery.body() == b"bad" {
            return Err("rejected".into());
        }
        Ok(())
    }
}

fn start(
    config: ListenerConfig,
    connector: Arc<MemoryConnector>,
    handler: Collector,
) -> (Shutdown, JoinHandle<Result<ShutdownReport, ListenerError>>) {
    let dispatcher = Dispatcher::new(config, connector, Arc::new(handler)).unwrap();
    let (shutdown, signal) = Shutdown::new();
    (shutdown, tokio::spawn(dispatcher.run(signal)))
}

async fn stop(
    shutdown: Shutdown,
    running: JoinHandle<Result<ShutdownReport, ListenerError>>,
) -> ShutdownReport {
    shutdown.trigger();
    timeout(Duration::from_secs(5), running)
        .await
        .expect("dispatcher did not stop")
        .unwrap()
        .unwrap()
}

async fn next(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("no delivery")
        .expect("handler dropped")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn rejected_message_is_released_and_the_next_one_acknowledged() {
    let connector = Arc::new(MemoryConnector::new());
    let orders = connector.add_queue("orders");
    let bad = orders.push(b"bad");
    let good = orders.push(b"good");

    let config = ListenerConfig::new(
        vec![BusDefinition::new("high", 10)],
        vec![QueueConfig::new("orders", "high").long_poll(WAIT)],
    )
    .unwrap();
    let (handler, mut seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler);

    assert_eq!(next(&mut seen).await.id, bad);
    assert_eq!(next(&mut seen).await.id, good);
    eventually(|| orders.acknowledged().len() == 1).await;

    let report = stop(shutdown, running).await;
    assert_eq!(orders.acknowledged(), vec![good]);
    assert_eq!(orders.released(), vec![bad]);
    assert_eq!(orders.pending(), 0);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.handler_failures, 1);
    assert!(report.failed_workers.is_empty());
}

#[tokio::test]
async fn busy_handler_stops_further_fetches() {
    let connector = Arc::new(MemoryConnector::new());
    let orders = connector.add_queue("orders");
    for n in 0..5 {
        orders.push(format!("{n}").as_bytes());
    }

    let config = ListenerConfig::new(
        vec![BusDefinition::new("high", 10)],
        vec![QueueConfig::new("orders", "high").long_poll(WAIT)],
    )
    .unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler.gated(Arc::clone(&gate)));

    assert_eq!(next(&mut seen).await.body, b"0");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(orders.pending(), 4);
    assert!(seen.try_recv().is_err());

    gate.add_permits(5);
    for n in 1..5 {
        assert_eq!(next(&mut seen).await.body, format!("{n}").as_bytes());
    }
    eventually(|| orders.acknowledged().len() == 5).await;

    let report = stop(shutdown, running).await;
    assert_eq!(report.acknowledged, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_is_never_run_concurrently() {
    let connector = Arc::new(MemoryConnector::new());
    let queues = ["a", "b", "c"].map(|name| connector.add_queue(name));
    for queue in &queues {
        for _ in 0..4 {
            queue.push(b"{}");
        }
    }

    let config = ListenerConfig::new(
        vec![
            BusDefinition::new("low", 1),
            BusDefinition::new("mid", 5),
            BusDefinition::new("high", 10),
        ],
        vec![
            QueueConfig::new("a", "low").long_poll(WAIT),
            QueueConfig::new("b", "mid").long_poll(WAIT),
            QueueConfig::new("c", "high").short_poll(Duration::from_millis(20)),
        ],
    )
    .unwrap();
    let (handler, _seen) = Collector::new();
    let max_in_flight = Arc::clone(&handler.max_in_flight);
    let (shutdown, running) = start(config, connector, handler);

    eventually(|| queues.iter().all(|queue| queue.acknowledged().len() == 4)).await;

    let report = stop(shutdown, running).await;
    assert_eq!(report.acknowledged, 12);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deliveries_carry_their_bus_and_priority() {
    let connector = Arc::new(MemoryConnector::new());
    connector.add_queue("audit").push(b"{}");

    let config = ListenerConfig::from_toml_str(
        r#"
        idle_wait_ms = 20

        [[buses]]
        name = "urgent"
        priority = 100

        [[queues]]
        name = "audit"
        mode = "short-poll"
        poll_interval_seconds = 1
        "#,
    )
    .unwrap();
    let (handler, mut seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler);

    let delivery = next(&mut seen).await;
    assert_eq!(delivery.queue, "audit");
    assert_eq!(delivery.bus, "default-bus");
    assert_eq!(delivery.priority, 1);

    stop(shutdown, running).await;
}

#[tokio::test]
async fn failed_listener_is_reported_and_others_keep_running() {
    let connector = Arc::new(MemoryConnector::new());
    let broken = connector.add_queue("broken");
    let healthy = connector.add_queue("healthy");
    broken.fail_next_fetch("throttled");
    let id = healthy.push(b"{}");

    let config = ListenerConfig::new(
        vec![BusDefinition::new("high", 10), BusDefinition::new("low", 1)],
        vec![
            QueueConfig::new("broken", "high").long_poll(WAIT),
            QueueConfig::new("healthy", "low").long_poll(WAIT),
        ],
    )
    .unwrap();
    let (handler, _seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler);

    eventually(|| healthy.acknowledged() == vec![id.clone()]).await;
    let report = stop(shutdown, running).await;

    assert_eq!(broken.fetch_count(), 1);
    assert_eq!(
        report.failed_workers,
        vec![(
            "broken".to_owned(),
            ListenerError::FetchError {
                queue: "broken".to_owned(),
                reason: "throttled".to_owned(),
            }
        )]
    );
}

#[tokio::test]
async fn shutdown_stops_every_listener() {
    let connector = Arc::new(MemoryConnector::new());
    let slow = connector.add_queue("slow");
    let fast = connector.add_queue("fast");

    let config = ListenerConfig::new(
        vec![BusDefinition::new("high", 10)],
        vec![
            QueueConfig::new("slow", "high").long_poll(WAIT),
            QueueConfig::new("fast", "high").short_poll(Duration::from_millis(10)),
        ],
    )
    .unwrap();
    let (handler, _seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler);

    eventually(|| fast.fetch_count() > 2 && slow.fetch_count() > 0).await;
    let report = stop(shutdown, running).await;
    assert_eq!(report, ShutdownReport::default());

    let fetched = (slow.fetch_count(), fast.fetch_count());
    sleep(Duration::from_millis(100)).await;
    assert_eq!((slow.fetch_count(), fast.fetch_count()), fetched);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queues_sharing_a_bus_deliver_every_message_once() {
    let connector = Arc::new(MemoryConnector::new());
    let first = connector.add_queue("first");
    let second = connector.add_queue("second");
    let mut pushed = Vec::new();
    for n in 0..5 {
        pushed.push(first.push(format!("first-{n}").as_bytes()));
        pushed.push(second.push(format!("second-{n}").as_bytes()));
    }

    let config = ListenerConfig::new(
        vec![BusDefinition::new("shared", 3)],
        vec![
            QueueConfig::new("first", "shared").long_poll(WAIT),
            QueueConfig::new("second", "shared").long_poll(WAIT),
        ],
    )
    .unwrap();
    let (handler, mut seen) = Collector::new();
    let (shutdown, running) = start(config, connector, handler);

    let mut delivered = Vec::new();
    for _ in 0..10 {
        let delivery = next(&mut seen).await;
        assert_eq!(delivery.bus, "shared");
        assert_eq!(delivery.priority, 3);
        assert!(delivery.body.starts_with(delivery.queue.as_bytes()));
        delivered.push(delivery.id);
    }
    eventually(|| first.acknowledged().len() + second.acknowledged().len() == 10).await;

    let report = stop(shutdown, running).await;
    assert_eq!(report.acknowledged, 10);
    assert!(seen.try_recv().is_err());

    delivered.sort();
    pushed.sort();
    assert_eq!(delivered, pushed);
    assert_eq!(first.acknowledged().len(), 5);
    assert_eq!(second.acknowledged().len(), 5);
    assert!(first.released().is_empty() && second.released().is_empty());
}
