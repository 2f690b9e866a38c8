// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod amqp;
pub mod bus;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod memory;
pub mod message;
pub mod registry;
pub mod signal;
pub mod source;
