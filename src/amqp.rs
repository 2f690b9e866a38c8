// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Source Queue Client
//!
//! Source queue client backed by RabbitMQ through lapin. Messages are pulled
//! with `basic.get` and manual acknowledgment. A message the handler rejects
//! is nacked without requeue, so the queue's dead-letter policy applies;
//! messages the listener never handed out are nacked back onto the queue.
//!
//! AMQP has no server side long poll for `basic.get`; a long polling fetch
//! re-polls every [`LONG_POLL_RETRY`] until a message arrives or the wait
//! elapses. Queues are addressed by name on the connection's vhost, so the
//! region and owner of a queue configuration do not apply here.

use crate::{
    channel::{new_amqp_channel, new_amqp_connection},
    config::{AmqpSettings, QueueConfig},
    errors::ListenerError,
    message::SourceMessage,
    source::{SourceConnector, SourceQueue},
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, QueueDeclareOptions},
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable},
    Channel, Connection,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error};

/// Pause between two `basic.get` calls of a long polling fetch
pub const LONG_POLL_RETRY: Duration = Duration::from_millis(100);

/// Resolves queue configurations into AMQP source queues over one connection.
pub struct AmqpConnector {
    conn: Arc<Connection>,
}

impl AmqpConnector {
    /// Opens the connection every queue channel is created on.
    ///
    /// # Parameters
    /// * `settings` - Broker address and credentials
    ///
    /// # Returns
    /// The connector, or `ConnectionError` if the broker is unreachable
    pub async fn connect(settings: &AmqpSettings) -> Result<AmqpConnector, ListenerError> {
        Ok(AmqpConnector {
            conn: new_amqp_connection(settings).await?,
        })
    }
}

#[async_trait]
impl SourceConnector for AmqpConnector {
    /// Opens a channel for the queue and checks the queue exists.
    async fn connect(&self, queue: &QueueConfig) -> Result<Arc<dyn SourceQueue>, ListenerError> {
        let channel = new_amqp_channel(&self.conn).await?;

        if let Err(err) = channel
            .queue_declare(
                queue.name(),
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
        {
            error!(error = err.to_string(), queue = queue.name(), "queue lookup failed");
            return Err(ListenerError::QueueNotFound(queue.name().to_owned()));
        }

        debug!(queue = queue.name(), "queue resolved");
        Ok(Arc::new(AmqpSourceQueue {
            name: queue.name().to_owned(),
            channel,
        }))
    }
}

/// One RabbitMQ queue polled with `basic.get`.
pub struct AmqpSourceQueue {
    name: String,
    channel: Channel,
}

impl AmqpSourceQueue {
    async fn get(&self) -> Result<Option<AmqpMessage>, ListenerError> {
        match self
            .channel
            .basic_get(&self.name, BasicGetOptions { no_ack: false })
            .await
        {
            Ok(Some(message)) => Ok(Some(AmqpMessage::new(message.delivery))),
            Ok(None) => Ok(None),
            Err(err) => {
                error!(error = err.to_string(), queue = %self.name, "failure to get message");
                Err(ListenerError::FetchError {
                    queue: self.name.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl SourceQueue for AmqpSourceQueue {
    async fn fetch(
        &self,
        max_count: usize,
        wait: Option<Duration>,
    ) -> Result<Vec<Box<dyn SourceMessage>>, ListenerError> {
        let deadline = wait.map(|wait| Instant::now() + wait);
        let mut messages: Vec<Box<dyn SourceMessage>> = Vec::new();

        loop {
            while messages.len() < max_count {
                match self.get().await? {
                    Some(message) => messages.push(Box::new(message)),
                    None => break,
                }
            }

            if !messages.is_empty() {
                return Ok(messages);
            }

            match deadline {
                Some(deadline) if Instant::now() + LONG_POLL_RETRY < deadline => {
                    tokio::time::sleep(LONG_POLL_RETRY).await
                }
                _ => return Ok(messages),
            }
        }
    }
}

/// A message pulled from RabbitMQ, acknowledged by delivery tag.
pub struct AmqpMessage {
    id: String,
    delivery: Delivery,
    attributes: HashMap<String, String>,
}

impl AmqpMessage {
    fn new(delivery: Delivery) -> AmqpMessage {
        AmqpMessage {
            id: message_id(&delivery.properties, delivery.delivery_tag),
            attributes: extract_attributes(&delivery.properties),
            delivery,
        }
    }
}

#[async_trait]
impl SourceMessage for AmqpMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    async fn acknowledge(&self) -> Result<(), ListenerError> {
        match self.delivery.ack(BasicAckOptions { multiple: false }).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), id = %self.id, "error whiling ack msg");
                Err(ListenerError::AckMessageError(self.id.clone()))
            }
        }
    }

    async fn release(&self, requeue: bool) -> Result<(), ListenerError> {
        match self
            .delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), id = %self.id, "error whiling nack msg");
                Err(ListenerError::NackMessageError(self.id.clone()))
            }
        }
    }
}

/// The AMQP message id when the publisher set one, the delivery tag otherwise.
fn message_id(props: &AMQPProperties, delivery_tag: u64) -> String {
    match props.message_id() {
        Some(id) => id.as_str().to_owned(),
        None => delivery_tag.to_string(),
    }
}

/// Collects the string valued headers of a message.
fn extract_attributes(props: &AMQPProperties) -> HashMap<String, String> {
    let Some(headers) = props.headers() else {
        return HashMap::default();
    };

    headers
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes()).ok()?,
                AMQPValue::ShortString(value) => value.as_str(),
                _ => return None,
            };
            Some((key.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}
