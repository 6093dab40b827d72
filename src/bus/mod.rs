//! The event bus abstraction: one contract (this module), two backends
//! ([`in_process`], [`brokered`]), selected by [`factory`].

pub mod brokered;
pub mod factory;
pub mod in_process;

pub use brokered::BrokeredEventBus;
pub use factory::{reset_event_bus, EventBusConfig, EventBusFactory};
pub use in_process::InProcessEventBus;

use crate::event::{Event, EventKind};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// A predicate run in publication order; returning `false` drops the event
/// before it reaches any subscriber.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A handle returned by `subscribe`, passed back to `unsubscribe`.
pub type SubscriptionId = Uuid;

/// Implemented by anything that wants to receive dispatched events.
/// A plain `async fn(Event)` wrapped in a small adapter (see
/// [`FnHandler`]) is usually enough; agents implement this directly so
/// their `process_task` can run on the handler's own task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

/// Adapts a boxed async closure into an [`EventHandler`], for call sites
/// (tests, simple subscribers) that don't want to define a struct.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn handle(&self, event: Event) {
        (self.0)(event).await;
    }
}

/// Snapshot of bus activity, returned by `get_statistics`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusStatistics {
    pub total_events_processed: u64,
    pub queue_depth: usize,
    pub subscriber_count: usize,
    pub filter_count: usize,
    pub running: bool,
    pub subscribers_by_kind: std::collections::HashMap<String, usize>,
}

/// The contract both backends implement. Semantics are specified in full at
/// the module level of each backend; this trait only fixes the shape.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn publish(&self, event: Event) -> Result<()>;
    async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId>;
    async fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> Result<()>;
    fn add_filter(&self, filter: EventFilter);
    async fn get_history(
        &self,
        kind: Option<EventKind>,
        source: Option<&str>,
        since: Option<i64>,
    ) -> Vec<Event>;
    async fn replay(&self, events: Vec<Event>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
    async fn get_statistics(&self) -> BusStatistics;
}
