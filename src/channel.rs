// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module handles the creation of AMQP connections and channels used by the
//! AMQP source queue client. One connection is shared by every queue; each queue
//! gets a channel of its own so a failure on one queue cannot close another's.

use crate::{config::AmqpSettings, errors::ListenerError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Opens a connection to the AMQP server described by `settings`.
///
/// # Returns
/// The connection wrapped in Arc for sharing, or `ConnectionError`
pub async fn new_amqp_connection(settings: &AmqpSettings) -> Result<Arc<Connection>, ListenerError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(settings.connection_name.clone()));

    match Connection::connect(&settings.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(ListenerError::ConnectionError)
        }
    }
}

/// Creates a new channel on an established connection.
pub async fn new_amqp_channel(conn: &Connection) -> Result<Channel, ListenerError> {
    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(channel) => {
            debug!("channel created");
            Ok(channel)
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(ListenerError::ChannelError)
        }
    }
}
