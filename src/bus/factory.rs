//! Selects an [`EventBus`] backend from configuration and owns the single
//! process-global instance. Grounded on the original `EventBusFactory` /
//! `get_event_bus` / `reset_event_bus` trio: type-based selection with a
//! fail-fast error on an unknown type, and an explicit `reset` that stops
//! the prior instance before dropping it.

use super::{BrokeredEventBus, EventBus, InProcessEventBus};
use crate::constants::DEFAULT_WORKER_POOL_SIZE;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Backend-selection configuration, mirroring the `event-bus type and its
/// options` configuration key (spec §6.5).
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub backend: String,
    pub consumer_group: String,
    pub worker_pool_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: "inmemory".to_string(),
            consumer_group: "multi-agent-runtime".to_string(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }
}

pub struct EventBusFactory;

impl EventBusFactory {
    pub fn create(config: &EventBusConfig) -> Result<Arc<dyn EventBus>> {
        match config.backend.as_str() {
            "inmemory" => Ok(Arc::new(InProcessEventBus::new())),
            "brokered" => Ok(Arc::new(BrokeredEventBus::new(
                config.consumer_group.clone(),
                config.worker_pool_size,
            ))),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

static GLOBAL_BUS: OnceCell<tokio::sync::Mutex<Option<Arc<dyn EventBus>>>> = OnceCell::const_new();

async fn global_slot() -> &'static tokio::sync::Mutex<Option<Arc<dyn EventBus>>> {
    GLOBAL_BUS
        .get_or_init(|| async { tokio::sync::Mutex::new(None) })
        .await
}

/// Returns the process-global event bus, creating and starting it on first
/// call. Subsequent calls ignore `config` and return the existing instance.
pub async fn get_event_bus(config: &EventBusConfig) -> Result<Arc<dyn EventBus>> {
    let slot = global_slot().await;
    let mut guard = slot.lock().await;
    if let Some(bus) = guard.as_ref() {
        return Ok(bus.clone());
    }

    let bus = EventBusFactory::create(config)?;
    bus.start().await?;
    *guard = Some(bus.clone());
    Ok(bus)
}

/// Stops and discards the global event bus. Intended for tests and for
/// switching backends between runs; callers must `get_event_bus` again
/// afterward to obtain a fresh instance.
pub async fn reset_event_bus() {
    let slot = global_slot().await;
    let mut guard = slot.lock().await;
    if let Some(bus) = guard.take() {
        let _ = bus.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    async fn unknown_backend_fails_fast() {
        let config = EventBusConfig {
            backend: "carrier_pigeon".to_string(),
            ..Default::default()
        };
        let result = EventBusFactory::create(&config);
        assert!(result.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn get_event_bus_is_a_singleton_until_reset() {
        reset_event_bus().await;
        let config = EventBusConfig::default();

        let first = get_event_bus(&config).await.unwrap();
        let second = get_event_bus(&config).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        reset_event_bus().await;
        let third = get_event_bus(&config).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
