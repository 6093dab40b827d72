//! Brokered event bus: the same contract as [`super::in_process`], but
//! organized around topics and consumer groups the way a partitioned log
//! would be. Grounded on the original `KafkaEventBus` — topic-per-kind
//! naming, lazy consumer creation on first subscribe, consumer teardown on
//! last unsubscribe, and a thread-pool-style concurrent dispatch.
//!
//! No broker client dependency is wired in: this process has no broker to
//! connect to in this deployment, so the backend is built on the same
//! in-process primitives as [`super::in_process`] while keeping the
//! topic/consumer-group vocabulary as real types. Swapping in a genuine
//! broker client later means implementing [`super::EventBus`] again, not
//! touching any caller.

use super::{BusStatistics, EventBus, EventFilter, EventHandler, SubscriptionId};
use crate::constants::EVENT_HISTORY_SIZE;
use crate::event::{Event, EventKind};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

pub type Topic = String;
pub type ConsumerGroup = String;

struct Consumer {
    subscribers: Vec<(SubscriptionId, Arc<dyn EventHandler>)>,
    sender: mpsc::Sender<Event>,
    /// Events sent to this topic's channel but not yet pulled off it by the
    /// consumer loop.
    queued: usize,
}

struct Inner {
    consumers: HashMap<Topic, Consumer>,
    filters: Vec<EventFilter>,
    history: VecDeque<Event>,
    total_processed: u64,
    running: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            consumers: HashMap::new(),
            filters: Vec::new(),
            history: VecDeque::with_capacity(EVENT_HISTORY_SIZE),
            total_processed: 0,
            running: false,
        }
    }

    fn push_history(&mut self, event: Event) {
        if self.history.len() >= EVENT_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

pub struct BrokeredEventBus {
    inner: Arc<Mutex<Inner>>,
    consumer_group: ConsumerGroup,
    max_workers: usize,
}

impl BrokeredEventBus {
    pub fn new(consumer_group: impl Into<ConsumerGroup>, max_workers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            consumer_group: consumer_group.into(),
            max_workers,
        }
    }

    async fn start_consumer_for_topic(inner: &Arc<Mutex<Inner>>, topic: Topic, max_workers: usize) {
        let (tx, mut rx) = mpsc::channel::<Event>(max_workers.max(1) * 64);
        {
            let mut guard = inner.lock().await;
            guard.consumers.insert(
                topic.clone(),
                Consumer {
                    subscribers: Vec::new(),
                    sender: tx,
                    queued: 0,
                },
            );
        }

        let inner = inner.clone();
        tokio::spawn(async move {
            info!(%topic, "brokered bus: consumer started");
            while let Some(event) = rx.recv().await {
                let handlers = {
                    let mut guard = inner.lock().await;
                    if let Some(consumer) = guard.consumers.get_mut(&topic) {
                        consumer.queued = consumer.queued.saturating_sub(1);
                    }
                    guard
                        .consumers
                        .get(&topic)
                        .map(|c| c.subscribers.clone())
                        .unwrap_or_default()
                };
                for (_, handler) in handlers {
                    let event = event.clone();
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        let handler_event = event.clone();
                        let joined =
                            tokio::spawn(async move { handler.handle(handler_event).await })
                                .await;
                        if joined.is_err() {
                            error!(event_id = %event.id, "brokered bus: handler panicked");
                            let error_event =
                                Event::new(EventKind::AgentError, "event_bus").with_field(
                                    "original_event",
                                    serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
                                );
                            let mut guard = inner.lock().await;
                            guard.push_history(error_event.clone());
                            guard.total_processed += 1;
                            drop(guard);
                            if let Some(consumer) = inner.lock().await.consumers.get(&error_event.kind.topic())
                            {
                                let _ = consumer.sender.try_send(error_event);
                            }
                        }
                    });
                }
            }
            debug!(%topic, "brokered bus: consumer stopped");
        });
    }
}

#[async_trait]
impl EventBus for BrokeredEventBus {
    async fn start(&self) -> Result<()> {
        self.inner.lock().await.running = true;
        info!(consumer_group = %self.consumer_group, "brokered bus: started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.running = false;
        guard.consumers.clear();
        Ok(())
    }

    async fn publish(&self, event: Event) -> Result<()> {
        if !self.inner.lock().await.running {
            return Err(Error::EventBus("bus is not running".to_string()));
        }

        let accepted = {
            let guard = self.inner.lock().await;
            guard.filters.iter().all(|f| f(&event))
        };
        if !accepted {
            return Ok(());
        }

        {
            let mut guard = self.inner.lock().await;
            guard.push_history(event.clone());
            guard.total_processed += 1;
        }

        let topic = event.kind.topic();
        let sender = self
            .inner
            .lock()
            .await
            .consumers
            .get(&topic)
            .map(|c| c.sender.clone());
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                return Err(Error::EventBus(format!("consumer for {topic} is gone")));
            }
            if let Some(consumer) = self.inner.lock().await.consumers.get_mut(&topic) {
                consumer.queued += 1;
            }
        }
        // No consumer registered for this topic yet: the event is still
        // recorded in history but has no subscriber to dispatch to.
        Ok(())
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let topic = kind.topic();
        let needs_consumer = !self.inner.lock().await.consumers.contains_key(&topic);
        if needs_consumer {
            BrokeredEventBus::start_consumer_for_topic(&self.inner, topic.clone(), self.max_workers)
                .await;
        }

        let id = SubscriptionId::new_v4();
        let mut guard = self.inner.lock().await;
        if let Some(consumer) = guard.consumers.get_mut(&topic) {
            consumer.subscribers.push((id, handler));
        }
        Ok(id)
    }

    async fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> Result<()> {
        let topic = kind.topic();
        let mut guard = self.inner.lock().await;
        if let Some(consumer) = guard.consumers.get_mut(&topic) {
            consumer.subscribers.retain(|(existing, _)| *existing != id);
            if consumer.subscribers.is_empty() {
                guard.consumers.remove(&topic);
            }
        }
        Ok(())
    }

    fn add_filter(&self, filter: EventFilter) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.lock().await.filters.push(filter);
        });
    }

    async fn get_history(
        &self,
        kind: Option<EventKind>,
        source: Option<&str>,
        since: Option<i64>,
    ) -> Vec<Event> {
        let guard = self.inner.lock().await;
        guard
            .history
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .filter(|e| source.map_or(true, |s| e.source == s))
            .filter(|e| since.map_or(true, |t| e.timestamp >= t))
            .cloned()
            .collect()
    }

    async fn get_statistics(&self) -> BusStatistics {
        let guard = self.inner.lock().await;
        let mut subscribers_by_kind = HashMap::new();
        let mut subscriber_count = 0;
        let mut queue_depth = 0;
        for (topic, consumer) in &guard.consumers {
            subscriber_count += consumer.subscribers.len();
            subscribers_by_kind.insert(topic.clone(), consumer.subscribers.len());
            queue_depth += consumer.queued;
        }

        BusStatistics {
            total_events_processed: guard.total_processed,
            queue_depth,
            subscriber_count,
            filter_count: guard.filters.len(),
            running: guard.running,
            subscribers_by_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FnHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn lazily_creates_consumer_on_subscribe() {
        let bus = BrokeredEventBus::new("test-group", 4);
        bus.start().await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        bus.subscribe(
            EventKind::TaskAssigned,
            Arc::new(FnHandler(move |_event| {
                let received = received_clone.clone();
                async move {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .await
        .unwrap();

        bus.publish(Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1"))
            .await
            .unwrap();
        settle().await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
        let stats = bus.get_statistics().await;
        assert_eq!(stats.subscriber_count, 1);
    }

    #[tokio::test]
    async fn last_unsubscribe_tears_down_consumer() {
        let bus = BrokeredEventBus::new("test-group", 4);
        bus.start().await.unwrap();

        let id = bus
            .subscribe(
                EventKind::TaskAssigned,
                Arc::new(FnHandler(|_event| async move {})),
            )
            .await
            .unwrap();

        bus.unsubscribe(EventKind::TaskAssigned, id).await.unwrap();

        let stats = bus.get_statistics().await;
        assert_eq!(stats.subscriber_count, 0);
    }
}
