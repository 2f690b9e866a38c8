// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Source Queues
//!
//! A process local implementation of the source queue client, used by the test
//! suite and by applications that want to feed the dispatcher without a remote
//! service. Queues are FIFO, long polling fetches wait for a push up to their
//! timeout, and acknowledgments and releases are recorded so callers can
//! observe them. There is no visibility timeout: a message is only redelivered
//! when it is released with requeue, and then it goes back to the front.

use crate::{
    config::QueueConfig,
    errors::ListenerError,
    message::SourceMessage,
    source::{SourceConnector, SourceQueue},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    time::{timeout_at, Instant},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    pending: Mutex<VecDeque<MemoryMessage>>,
    acknowledged: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    fetches: AtomicUsize,
    arrivals: Notify,
}

/// A message held by a [`MemorySourceQueue`].
#[derive(Clone)]
pub struct MemoryMessage {
    id: String,
    body: Vec<u8>,
    attributes: HashMap<String, String>,
    origin: Option<Arc<QueueState>>,
}

impl MemoryMessage {
    /// A message that belongs to no queue; acknowledging it is a no-op.
    pub fn detached(id: &str, body: &[u8]) -> MemoryMessage {
        MemoryMessage {
            id: id.to_owned(),
            body: body.to_vec(),
            attributes: HashMap::default(),
            origin: None,
        }
    }
}

#[async_trait]
impl SourceMessage for MemoryMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    async fn acknowledge(&self) -> Result<(), ListenerError> {
        if let Some(origin) = &self.origin {
            lock(&origin.acknowledged).push(self.id.clone());
        }
        Ok(())
    }

    async fn release(&self, requeue: bool) -> Result<(), ListenerError> {
        if let Some(origin) = &self.origin {
            lock(&origin.released).push(self.id.clone());
            if requeue {
                lock(&origin.pending).push_front(self.clone());
                origin.arrivals.notify_one();
            }
        }
        Ok(())
    }
}

/// A FIFO queue living in the current process.
pub struct MemorySourceQueue {
    name: String,
    state: Arc<QueueState>,
}

impl MemorySourceQueue {
    pub fn new(name: &str) -> Arc<MemorySourceQueue> {
        Arc::new(MemorySourceQueue {
            name: name.to_owned(),
            state: Arc::new(QueueState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a message and returns its generated id.
    pub fn push(&self, body: &[u8]) -> String {
        self.push_with_attributes(body, HashMap::default())
    }

    pub fn push_with_attributes(&self, body: &[u8], attributes: HashMap<String, String>) -> String {
        let id = Uuid::new_v4().to_string();
        lock(&self.state.pending).push_back(MemoryMessage {
            id: id.clone(),
            body: body.to_vec(),
            attributes,
            origin: Some(Arc::clone(&self.state)),
        });
        self.state.arrivals.notify_one();
        id
    }

    /// Makes the next fetch fail with `reason`.
    pub fn fail_next_fetch(&self, reason: &str) {
        *lock(&self.state.failure) = Some(reason.to_owned());
    }

    /// Ids acknowledged so far, in acknowledgment order.
    pub fn acknowledged(&self) -> Vec<String> {
        lock(&self.state.acknowledged).clone()
    }

    /// Ids given back unacknowledged, in release order.
    pub fn released(&self) -> Vec<String> {
        lock(&self.state.released).clone()
    }

    pub fn pending(&self) -> usize {
        lock(&self.state.pending).len()
    }

    /// Number of fetch calls served, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    fn pop(&self, max_count: usize) -> Vec<Box<dyn SourceMessage>> {
        let mut pending = lock(&self.state.pending);
        let count = max_count.min(pending.len());
        let messages = pending
            .drain(..count)
            .map(|message| Box::new(message) as Box<dyn SourceMessage>)
            .collect();
        messages
    }
}

#[async_trait]
impl SourceQueue for MemorySourceQueue {
    async fn fetch(
        &self,
        max_count: usize,
        wait: Option<Duration>,
    ) -> Result<Vec<Box<dyn SourceMessage>>, ListenerError> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = lock(&self.state.failure).take() {
            return Err(ListenerError::FetchError {
                queue: self.name.clone(),
                reason,
            });
        }

        let deadline = wait.map(|wait| Instant::now() + wait);
        loop {
            let messages = self.pop(max_count);
            if !messages.is_empty() {
                debug!(queue = %self.name, count = messages.len(), "fetched");
                return Ok(messages);
            }

            let Some(deadline) = deadline else {
                return Ok(messages);
            };

            if timeout_at(deadline, self.state.arrivals.notified())
                .await
                .is_err()
            {
                return Ok(vec![]);
            }
        }
    }
}

/// Resolves queue configurations against a fixed set of in-memory queues.
#[derive(Default)]
pub struct MemoryConnector {
    queues: Mutex<HashMap<String, Arc<MemorySourceQueue>>>,
}

impl MemoryConnector {
    pub fn new() -> MemoryConnector {
        MemoryConnector::default()
    }

    /// Creates the queue `name`, or returns it if it already exists.
    ///
    /// # Returns
    /// A handle to push messages and observe acknowledgments and releases
    pub fn add_queue(&self, name: &str) -> Arc<MemorySourceQueue> {
        Arc::clone(
            lock(&self.queues)
                .entry(name.to_owned())
                .or_insert_with(|| MemorySourceQueue::new(name)),
        )
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn connect(&self, queue: &QueueConfig) -> Result<Arc<dyn SourceQueue>, ListenerError> {
        match lock(&self.queues).get(queue.name()) {
            Some(found) => Ok(Arc::clone(found) as Arc<dyn SourceQueue>),
            None => Err(ListenerError::QueueNotFound(queue.name().to_owned())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
