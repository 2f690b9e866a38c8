// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Listener Configuration
//!
//! This module provides the configuration model of the listener: one
//! [`QueueConfig`] per monitored source queue, the [`BusDefinition`]s the
//! queues are grouped into, and [`ListenerConfig`], the validated whole that can
//! be built programmatically or loaded from a TOML file.

use crate::errors::ListenerError;
use serde::Deserialize;
use std::{collections::HashSet, path::Path, time::Duration};
use tracing::debug;

/// Name of the bus queues are assigned to when none is given
pub const DEFAULT_BUS_NAME: &str = "default-bus";
/// Priority of the implicit default bus
pub const DEFAULT_BUS_PRIORITY: i32 = 1;
/// Locator handed to connectors when a queue does not specify one
pub const DEFAULT_REGION: &str = "eu-west-1";
/// How long a long polling fetch may block waiting for a message
pub const DEFAULT_LONG_POLL_WAIT: Duration = Duration::from_secs(5);
/// Pause between two empty short polling fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound of the dispatcher wait after a pass that found nothing
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(100);

/// Strategy a listener uses to fetch from its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Each fetch blocks up to `wait` and returns as soon as a message arrives.
    LongPoll { wait: Duration },
    /// Each fetch returns immediately; an empty fetch is followed by a pause of `interval`.
    ShortPoll { interval: Duration },
}

impl Default for PollMode {
    fn default() -> Self {
        PollMode::LongPoll {
            wait: DEFAULT_LONG_POLL_WAIT,
        }
    }
}

/// Configuration of one monitored source queue.
///
/// Built with the builder methods below and immutable once handed to a
/// [`ListenerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub(crate) name: String,
    pub(crate) bus: String,
    pub(crate) poll_mode: PollMode,
    pub(crate) region: String,
    pub(crate) owner: Option<String>,
}

impl QueueConfig {
    /// Creates a long polling queue configuration assigned to `bus`.
    pub fn new(name: &str, bus: &str) -> QueueConfig {
        QueueConfig {
            name: name.to_owned(),
            bus: bus.to_owned(),
            poll_mode: PollMode::default(),
            region: DEFAULT_REGION.to_owned(),
            owner: None,
        }
    }

    /// Switches the queue to long polling with the given fetch wait.
    pub fn long_poll(mut self, wait: Duration) -> Self {
        self.poll_mode = PollMode::LongPoll { wait };
        self
    }

    /// Switches the queue to short polling with the given pause between empty fetches.
    pub fn short_poll(mut self, interval: Duration) -> Self {
        self.poll_mode = PollMode::ShortPoll { interval };
        self
    }

    /// Sets the region or endpoint locator passed to the connector.
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_owned();
        self
    }

    /// Sets the account owning the queue, for queues shared across accounts.
    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_owned());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn poll_mode(&self) -> PollMode {
        self.poll_mode
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// A named, priority tagged bus as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusDefinition {
    pub name: String,
    pub priority: i32,
}

impl BusDefinition {
    pub fn new(name: &str, priority: i32) -> BusDefinition {
        BusDefinition {
            name: name.to_owned(),
            priority,
        }
    }
}

/// Connection parameters for the AMQP source queue client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AmqpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
}

impl Default for AmqpSettings {
    fn default() -> Self {
        AmqpSettings {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            connection_name: "bus-listener".to_owned(),
        }
    }
}

impl AmqpSettings {
    pub(crate) fn uri(&self) -> String {
        let base = format!(
            "amqp://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        );
        // no path selects the broker's default vhost
        if self.vhost.is_empty() {
            base
        } else {
            format!("{base}/{}", self.vhost)
        }
    }
}

/// The validated topology of a listener: buses, queues and dispatcher timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub(crate) buses: Vec<BusDefinition>,
    pub(crate) queues: Vec<QueueConfig>,
    pub(crate) idle_wait: Duration,
    pub(crate) amqp: AmqpSettings,
}

impl ListenerConfig {
    /// Validates buses and queues and builds a configuration.
    ///
    /// The default bus is declared implicitly when a queue references it
    /// without it being listed in `buses`.
    pub fn new(
        buses: Vec<BusDefinition>,
        queues: Vec<QueueConfig>,
    ) -> Result<ListenerConfig, ListenerError> {
        let mut buses = buses;
        let mut names = HashSet::new();
        for bus in &buses {
            if !names.insert(bus.name.clone()) {
                return Err(ListenerError::DuplicateBus(bus.name.clone()));
            }
        }

        for queue in &queues {
            if !names.contains(&queue.bus) {
                if queue.bus != DEFAULT_BUS_NAME {
                    return Err(ListenerError::UnknownBus {
                        queue: queue.name.clone(),
                        bus: queue.bus.clone(),
                    });
                }
                debug!("declaring implicit bus {}", DEFAULT_BUS_NAME);
                names.insert(DEFAULT_BUS_NAME.to_owned());
                buses.push(BusDefinition::new(DEFAULT_BUS_NAME, DEFAULT_BUS_PRIORITY));
            }

            let pause = match queue.poll_mode {
                PollMode::LongPoll { wait } => wait,
                PollMode::ShortPoll { interval } => interval,
            };
            if pause.is_zero() {
                return Err(ListenerError::InvalidPollInterval(queue.name.clone()));
            }
        }

        Ok(ListenerConfig {
            buses,
            queues,
            idle_wait: DEFAULT_IDLE_WAIT,
            amqp: AmqpSettings::default(),
        })
    }

    /// Overrides the dispatcher wait after an empty pass.
    ///
    /// # Returns
    /// The updated configuration, or `InvalidIdleWait` for a zero wait
    pub fn idle_wait(mut self, wait: Duration) -> Result<Self, ListenerError> {
        if wait.is_zero() {
            return Err(ListenerError::InvalidIdleWait);
        }
        self.idle_wait = wait;
        Ok(self)
    }

    /// Overrides the AMQP connection parameters.
    pub fn amqp(mut self, settings: AmqpSettings) -> Self {
        self.amqp = settings;
        self
    }

    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<ListenerConfig, ListenerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ListenerError::ConfigReadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates a TOML configuration document.
    pub fn from_toml_str(raw: &str) -> Result<ListenerConfig, ListenerError> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| ListenerError::ConfigParseError(e.to_string()))?;

        let queues = file.queues.into_iter().map(QueueConfig::from).collect();
        let config = ListenerConfig::new(file.buses, queues)?;

        Ok(config
            .idle_wait(Duration::from_millis(
                file.idle_wait_ms
                    .unwrap_or(DEFAULT_IDLE_WAIT.as_millis() as u64),
            ))?
            .amqp(file.amqp.unwrap_or_default()))
    }

    pub fn buses(&self) -> &[BusDefinition] {
        &self.buses
    }

    pub fn queues(&self) -> &[QueueConfig] {
        &self.queues
    }

    pub fn amqp_settings(&self) -> &AmqpSettings {
        &self.amqp
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    idle_wait_ms: Option<u64>,
    amqp: Option<AmqpSettings>,
    #[serde(default)]
    buses: Vec<BusDefinition>,
    #[serde(default)]
    queues: Vec<QueueEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ModeEntry {
    #[default]
    LongPoll,
    ShortPoll,
}

#[derive(Debug, Deserialize)]
struct QueueEntry {
    name: String,
    #[serde(default = "default_bus_name")]
    bus: String,
    #[serde(default)]
    mode: ModeEntry,
    wait_seconds: Option<u64>,
    poll_interval_seconds: Option<u64>,
    region: Option<String>,
    owner: Option<String>,
}

fn default_bus_name() -> String {
    DEFAULT_BUS_NAME.to_owned()
}

impl From<QueueEntry> for QueueConfig {
    fn from(entry: QueueEntry) -> Self {
        let mut queue = QueueConfig::new(&entry.name, &entry.bus);

        queue = match entry.mode {
            ModeEntry::LongPoll => queue.long_poll(
                entry
                    .wait_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_LONG_POLL_WAIT),
            ),
            ModeEntry::ShortPoll => queue.short_poll(
                entry
                    .poll_interval_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            ),
        };

        if let Some(region) = entry.region {
            queue = queue.with_region(&region);
        }

        if let Some(owner) = entry.owner {
            queue = queue.with_owner(&owner);
        }

        queue
    }
}
