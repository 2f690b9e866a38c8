// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bus Registry
//!
//! The fixed, priority ordered view over every bus, built once at startup.
//! Buses are sorted by descending priority; buses sharing a priority keep the
//! order in which they were declared. The order never changes afterwards.

use crate::{bus::Bus, config::BusDefinition, errors::ListenerError};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::Notify;
use tracing::info;

pub struct BusRegistry {
    buses: Vec<Arc<Bus>>,
    arrivals: Arc<Notify>,
}

impl BusRegistry {
    /// Builds the registry from bus definitions.
    ///
    /// # Returns
    /// The registry, or `DuplicateBus` if two definitions share a name
    pub fn new(definitions: &[BusDefinition]) -> Result<BusRegistry, ListenerError> {
        let arrivals = Arc::new(Notify::new());
        let mut seen = HashSet::new();
        let mut buses = Vec::with_capacity(definitions.len());

        for def in definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(ListenerError::DuplicateBus(def.name.clone()));
            }
            buses.push(Arc::new(Bus::with_arrivals(
                &def.name,
                def.priority,
                Arc::clone(&arrivals),
            )));
        }

        // sort_by is stable: declaration order breaks ties
        buses.sort_by(|a, b| b.priority().cmp(&a.priority()));

        info!("registered event buses:");
        for bus in &buses {
            info!(" - {}", bus);
        }

        Ok(BusRegistry { buses, arrivals })
    }

    /// Buses from highest to lowest priority.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Bus>> {
        self.buses.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Bus>> {
        self.buses.iter().find(|bus| bus.name() == name)
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Resolves once a message has been published on any bus since the last
    /// call returned. A publish that happened while nobody was waiting is not lost.
    pub async fn arrival(&self) {
        self.arrivals.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryMessage, message::InFlightMessage};
    use std::time::Duration;
    use tokio::time::timeout;

    fn names(registry: &BusRegistry) -> Vec<&str> {
        registry.iter().map(|bus| bus.name()).collect()
    }

    #[test]
    fn orders_by_descending_priority() {
        let registry = BusRegistry::new(&[
            BusDefinition::new("low", 1),
            BusDefinition::new("high", 10),
            BusDefinition::new("mid", 5),
        ])
        .unwrap();

        assert_eq!(names(&registry), vec!["high", "mid", "low"]);
    }

    #[test]
    fn ties_keep_declaration_order() {
        let registry = BusRegistry::new(&[
            BusDefinition::new("b", 3),
            BusDefinition::new("top", 7),
            BusDefinition::new("a", 3),
            BusDefinition::new("c", 3),
        ])
        .unwrap();

        assert_eq!(names(&registry), vec!["top", "b", "a", "c"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = BusRegistry::new(&[BusDefinition::new("a", 3), BusDefinition::new("a", 4)]);

        assert_eq!(result.err(), Some(ListenerError::DuplicateBus("a".to_owned())));
    }

    #[test]
    fn looks_up_buses_by_name() {
        let registry =
            BusRegistry::new(&[BusDefinition::new("high", 10), BusDefinition::new("low", 1)])
                .unwrap();

        assert_eq!(registry.get("low").map(|bus| bus.priority()), Some(1));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn publish_before_waiting_is_remembered() {
        let registry = BusRegistry::new(&[BusDefinition::new("high", 10)]).unwrap();
        let bus = registry.get("high").unwrap();

        bus.channel()
            .put(InFlightMessage::new(
                "orders",
                Box::new(MemoryMessage::detached("m1", b"")),
            ))
            .await
            .unwrap();

        timeout(Duration::from_millis(100), registry.arrival())
            .await
            .expect("arrival should already be signalled");
    }
}
