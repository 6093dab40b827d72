//! In-process event bus: pub/sub over a bounded channel, dispatched to a
//! bounded worker pool, with a trailing history ring buffer. Grounded on
//! the original `InMemoryEventBus` (queue + per-handler concurrent
//! dispatch + safe-handler error isolation).

use super::{BusStatistics, EventBus, EventFilter, EventHandler, SubscriptionId};
use crate::constants::{DEFAULT_QUEUE_SOFT_CAP, DEFAULT_WORKER_POOL_SIZE, EVENT_HISTORY_SIZE};
use crate::event::{Event, EventKind};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, warn};

struct Inner {
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
    filters: Vec<EventFilter>,
    history: VecDeque<Event>,
    total_processed: u64,
    running: bool,
    /// Events handed to the dispatch channel but not yet pulled off it by
    /// the dispatch loop.
    queued: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            filters: Vec::new(),
            history: VecDeque::with_capacity(EVENT_HISTORY_SIZE),
            total_processed: 0,
            running: false,
            queued: 0,
        }
    }

    fn push_history(&mut self, event: Event) {
        if self.history.len() >= EVENT_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

pub struct InProcessEventBus {
    inner: Arc<Mutex<Inner>>,
    sender: Arc<Mutex<Option<mpsc::Sender<Event>>>>,
    dispatch_pool: Arc<Semaphore>,
    queue_capacity: usize,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WORKER_POOL_SIZE, DEFAULT_QUEUE_SOFT_CAP)
    }

    pub fn with_capacity(worker_pool_size: usize, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            sender: Arc::new(Mutex::new(None)),
            dispatch_pool: Arc::new(Semaphore::new(worker_pool_size)),
            queue_capacity,
        }
    }

    /// Dispatches one event: snapshot the handler list under a short lock,
    /// release it, then run each handler concurrently under the bounded
    /// worker-pool semaphore. A handler that panics is isolated by running
    /// it in its own spawned task and observing the `JoinError`; the
    /// outer task then re-publishes it as `AgentError`.
    async fn dispatch(
        inner: Arc<Mutex<Inner>>,
        sender: Arc<Mutex<Option<mpsc::Sender<Event>>>>,
        pool: Arc<Semaphore>,
        event: Event,
    ) {
        let handlers = {
            let guard = inner.lock().await;
            guard
                .subscribers
                .get(&event.kind)
                .cloned()
                .unwrap_or_default()
        };

        for (_, handler) in handlers {
            let permit = pool.clone().acquire_owned().await.ok();
            let event = event.clone();
            let inner = inner.clone();
            let sender = sender.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let handler_event = event.clone();
                let joined =
                    tokio::spawn(async move { handler.handle(handler_event).await }).await;

                if joined.is_err() {
                    error!(event_id = %event.id, kind = ?event.kind, "handler panicked");
                    let error_event = Event::new(EventKind::AgentError, "event_bus").with_field(
                        "original_event",
                        serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
                    );
                    InProcessEventBus::publish_inner(&inner, &sender, error_event).await;
                }
            });
        }
    }

    /// Shared publish path used both by the public `publish` and by
    /// internal error-isolation re-injection, so both go through the same
    /// filter/history/send sequence.
    async fn publish_inner(
        inner: &Arc<Mutex<Inner>>,
        sender: &Arc<Mutex<Option<mpsc::Sender<Event>>>>,
        event: Event,
    ) {
        let accepted = {
            let guard = inner.lock().await;
            guard.filters.iter().all(|f| f(&event))
        };
        if !accepted {
            debug!(event_id = %event.id, "event dropped by filter");
            return;
        }

        {
            let mut guard = inner.lock().await;
            guard.push_history(event.clone());
            guard.total_processed += 1;
        }

        let tx = sender.lock().await.clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                warn!("event bus dispatch channel closed; event not delivered");
            } else {
                inner.lock().await.queued += 1;
            }
        }
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn start(&self) -> Result<()> {
        let mut sender_guard = self.sender.lock().await;
        if sender_guard.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Event>(self.queue_capacity);
        *sender_guard = Some(tx);
        self.inner.lock().await.running = true;

        let inner = self.inner.clone();
        let sender = self.sender.clone();
        let pool = self.dispatch_pool.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                {
                    let mut guard = inner.lock().await;
                    guard.queued = guard.queued.saturating_sub(1);
                }
                InProcessEventBus::dispatch(inner.clone(), sender.clone(), pool.clone(), event)
                    .await;
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut sender_guard = self.sender.lock().await;
        *sender_guard = None;
        self.inner.lock().await.running = false;
        Ok(())
    }

    async fn publish(&self, event: Event) -> Result<()> {
        if self.sender.lock().await.is_none() {
            return Err(Error::EventBus("bus is not running".to_string()));
        }
        InProcessEventBus::publish_inner(&self.inner, &self.sender, event).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new_v4();
        let mut guard = self.inner.lock().await;
        guard.subscribers.entry(kind).or_default().push((id, handler));
        Ok(id)
    }

    async fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(handlers) = guard.subscribers.get_mut(&kind) {
            handlers.retain(|(existing, _)| *existing != id);
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
        for (kind, handlers) in &guard.subscribers {
            subscriber_count += handlers.len();
            subscribers_by_kind.insert(format!("{kind:?}"), handlers.len());
        }

        BusStatistics {
            total_events_processed: guard.total_processed,
            queue_depth: guard.queued,
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
    async fn subscriber_receives_published_event() {
        let bus = InProcessEventBus::new();
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
    }

    #[tokio::test]
    async fn filter_drops_events_before_dispatch() {
        let bus = InProcessEventBus::new();
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

        bus.add_filter(Arc::new(|event: &Event| {
            event.field_str("priority") == Some("high")
        }));
        settle().await;

        bus.publish(
            Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1")
                .with_field("priority", "normal"),
        )
        .await
        .unwrap();
        settle().await;

        assert_eq!(received.load(Ordering::SeqCst), 0);
        let stats = bus.get_statistics().await;
        assert_eq!(stats.total_events_processed, 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InProcessEventBus::new();
        bus.start().await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let id = bus
            .subscribe(
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

        bus.unsubscribe(EventKind::TaskAssigned, id).await.unwrap();
        bus.publish(Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1"))
            .await
            .unwrap();
        settle().await;

        assert_eq!(received.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_respects_ring_buffer_and_filters() {
        let bus = InProcessEventBus::new();
        bus.start().await.unwrap();

        bus.publish(Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1"))
            .await
            .unwrap();
        bus.publish(Event::for_task(EventKind::TaskCompleted, "backend_agent", "t1"))
            .await
            .unwrap();
        settle().await;

        let assigned_only = bus.get_history(Some(EventKind::TaskAssigned), None, None).await;
        assert_eq!(assigned_only.len(), 1);

        let all = bus.get_history(None, None, None).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_dispatch_and_publishes_agent_error() {
        let bus = InProcessEventBus::new();
        bus.start().await.unwrap();

        bus.subscribe(
            EventKind::TaskAssigned,
            Arc::new(FnHandler(|_event| async move {
                panic!("boom");
            })),
        )
        .await
        .unwrap();

        let survived = Arc::new(AtomicUsize::new(0));
        let survived_clone = survived.clone();
        bus.subscribe(
            EventKind::AgentError,
            Arc::new(FnHandler(move |_event| {
                let survived = survived_clone.clone();
                async move {
                    survived.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .await
        .unwrap();

        bus.publish(Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1"))
            .await
            .unwrap();
        settle().await;

        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }
}
