// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! bus-listener: listens to the RabbitMQ queues of a TOML configuration and
//! logs every message it dispatches, until Ctrl-C.
//
//  $ bus-listener --config bus-listener.toml

use bus_listener::{
    amqp::AmqpConnector,
    config::ListenerConfig,
    dispatcher::Dispatcher,
    errors::BoxError,
    handler::handler_fn,
    logging::{init_logging, DEFAULT_LOG_FILTER},
    signal::Shutdown,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "bus-listener", version, about = "Priority bus queue listener")]
struct Cli {
    /// Path to config TOML (env BUS_LISTENER_CONFIG overrides)
    #[arg(short, long, default_value = "bus-listener.toml")]
    config: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    let cfg_path = std::env::var("BUS_LISTENER_CONFIG").unwrap_or(cli.config);
    let config = ListenerConfig::from_file(&cfg_path)?;
    info!(
        config = %cfg_path,
        buses = config.buses().len(),
        queues = config.queues().len(),
        "configuration loaded"
    );

    let connector = AmqpConnector::connect(config.amqp_settings()).await?;
    let handler = handler_fn(|delivery| {
        info!(
            queue = delivery.queue_name,
            bus = delivery.bus_name,
            priority = delivery.priority,
            id = delivery.id(),
            size = delivery.body().len(),
            "message received"
        );
        Ok(())
    });
    let dispatcher = Dispatcher::new(config, Arc::new(connector), Arc::new(handler))?;

    let (shutdown, signal) = Shutdown::new();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failure to listen for ctrl-c");
        }
        info!("ctrl-c received");
        shutdown.trigger();
    });

    let report = dispatcher.run(signal).await?;
    for (queue, err) in &report.failed_workers {
        error!(queue, error = %err, "listener ended with an error");
    }
    info!(
        acknowledged = report.acknowledged,
        handler_failures = report.handler_failures,
        ack_failures = report.ack_failures,
        "bye"
    );

    Ok(())
}
