// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Bus Listener
//!
//! This module provides the error type shared by every part of the listener:
//! configuration loading, source queue access, bus slot handling and worker
//! supervision. Handler failures are deliberately not part of this enum; user
//! handlers return a [`BoxError`] so any error type can be surfaced.

use thiserror::Error;

/// Error type returned by user supplied handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Represents errors that can occur while listening to source queues and
/// dispatching their messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error reading a configuration file
    #[error("failure to read configuration `{path}`: {reason}")]
    ConfigReadError { path: String, reason: String },

    /// Error parsing the TOML configuration
    #[error("failure to parse configuration: {0}")]
    ConfigParseError(String),

    /// A queue references a bus that was never declared
    #[error("queue `{queue}` references unknown bus `{bus}`")]
    UnknownBus { queue: String, bus: String },

    /// Two buses were declared with the same name
    #[error("bus `{0}` declared more than once")]
    DuplicateBus(String),

    /// A queue was configured with a zero long poll wait or short poll interval
    #[error("queue `{0}` has an invalid poll interval")]
    InvalidPollInterval(String),

    /// The dispatcher was configured with a zero idle wait
    #[error("dispatcher idle wait must be greater than zero")]
    InvalidIdleWait,

    /// Error establishing a connection to the remote queueing service
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The remote service does not know the queue
    #[error("failure to resolve queue `{0}`")]
    QueueNotFound(String),

    /// Error fetching messages from a source queue
    #[error("failure to fetch from queue `{queue}`: {reason}")]
    FetchError { queue: String, reason: String },

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(String),

    /// Error handing an unacknowledged message back to its source
    #[error("failure to nack message `{0}`")]
    NackMessageError(String),

    /// `mark_done` was called on a bus that has no taken message
    #[error("bus `{0}` has no message awaiting completion")]
    BusSlotNotTaken(String),

    /// A listener worker panicked
    #[error("listener for queue `{0}` panicked")]
    WorkerPanicked(String),
}
