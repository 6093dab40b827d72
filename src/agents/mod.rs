//! The agent runtime base: every specialized agent ([`roles`]) and the
//! [`orchestrator`] are built on [`AgentRuntime`], which owns subscription,
//! per-task dispatch, heartbeat replies, and graceful shutdown. Grounded on
//! the original `BaseAgent` lifecycle (subscribe once, dispatch workers per
//! task, reply to health checks, drain on shutdown) and on
//! `AtomicTaskStateManager`'s lock-ordering discipline for the active-task
//! bookkeeping below.

pub mod orchestrator;
pub mod roles;

use crate::bus::{EventBus, EventHandler, SubscriptionId};
use crate::event::{Event, EventKind};
use crate::store::{Store, TaskStatus};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Implemented by every specialized agent. `execute` runs in its own
/// spawned task so a long-running or panicking task cannot block the
/// agent's event loop.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn role(&self) -> &str;

    /// True if this agent's keyword table matches the task description.
    fn can_handle(&self, task_description: &str) -> bool;

    /// Executes the task, returning the output text to store on success.
    async fn execute(&self, task: &crate::store::Task) -> Result<String>;

    /// `Custom` sub-event names this agent reacts to (e.g.
    /// `"api_validation_request"`). Empty by default.
    fn custom_event_names(&self) -> &[&str] {
        &[]
    }

    /// Handles one `Custom` event whose name is in `custom_event_names`.
    /// No-op by default.
    async fn handle_custom_event(&self, _event_name: &str, _event: &Event) {}
}

#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

struct RuntimeInner {
    active_tasks: HashMap<String, JoinHandle<()>>,
    stats: AgentStats,
}

/// Wraps an [`Agent`] with subscription to the runtime's four lifecycle
/// events (`TaskAssigned`, `TaskRetry`, `SystemHealthCheck`,
/// `SystemShutdown`) and owns the active-task map.
pub struct AgentRuntime<A: Agent> {
    agent: Arc<A>,
    bus: Arc<dyn EventBus>,
    store: Arc<Store>,
    inner: Arc<Mutex<RuntimeInner>>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
    shutting_down: Arc<AtomicBool>,
}

struct DispatchHandler<A: Agent> {
    agent: Arc<A>,
    bus: Arc<dyn EventBus>,
    store: Arc<Store>,
    inner: Arc<Mutex<RuntimeInner>>,
    shutting_down: Arc<AtomicBool>,
}

#[async_trait]
impl<A: Agent> EventHandler for DispatchHandler<A> {
    async fn handle(&self, event: Event) {
        match event.kind {
            EventKind::TaskAssigned | EventKind::TaskRetry => {
                self.on_task_event(event).await;
            }
            EventKind::SystemHealthCheck => {
                self.on_health_check(event).await;
            }
            EventKind::SystemShutdown => {
                info!(role = self.agent.role(), "system shutdown received, no further tasks will be dispatched");
                self.shutting_down.store(true, Ordering::SeqCst);
            }
            EventKind::Custom => {
                if let Some(name) = event.custom_event_name() {
                    if self.agent.custom_event_names().contains(&name) {
                        self.agent.handle_custom_event(name, &event).await;
                    }
                }
            }
            _ => {}
        }
    }
}

impl<A: Agent> DispatchHandler<A> {
    async fn on_task_event(&self, event: Event) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let Some(task_id) = event.field_str("task_id").map(str::to_string) else {
            warn!("task event missing task_id field");
            return;
        };
        let Some(assigned_agent) = event.field_str("assigned_agent") else {
            return;
        };
        if assigned_agent != self.agent.role() {
            return;
        }

        let Some(task) = self.store.get_task(&task_id).await else {
            warn!(task_id, "assigned task not found in store");
            return;
        };
        if !self.agent.can_handle(&task.description) {
            debug!(task_id, role = self.agent.role(), "task does not match this agent's keywords");
        }

        let agent = self.agent.clone();
        let bus = self.bus.clone();
        let store = self.store.clone();
        let inner = self.inner.clone();
        let task_id_for_map = task_id.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = store
                .update_task_status(&task_id, TaskStatus::InProgress, None, None)
                .await
            {
                error!(task_id, error = %e, "failed to mark task in progress");
                return;
            }

            let outcome = tokio::spawn({
                let agent = agent.clone();
                let task = task.clone();
                async move { agent.execute(&task).await }
            })
            .await;

            match outcome {
                Ok(Ok(output)) => {
                    let _ = store
                        .update_task_status(&task_id, TaskStatus::Completed, Some(output), None)
                        .await;
                    inner.lock().await.stats.tasks_completed += 1;
                    let _ = bus
                        .publish(Event::for_task(EventKind::TaskCompleted, agent.role(), &task_id))
                        .await;
                }
                Ok(Err(e)) => {
                    let _ = store
                        .update_task_status(&task_id, TaskStatus::Failed, None, Some(e.to_string()))
                        .await;
                    inner.lock().await.stats.tasks_failed += 1;
                    let _ = bus
                        .publish(
                            Event::for_task(EventKind::TaskFailed, agent.role(), &task_id)
                                .with_field("error", e.to_string()),
                        )
                        .await;
                }
                Err(join_error) => {
                    let message = format!("task handler panicked: {join_error}");
                    let _ = store
                        .update_task_status(&task_id, TaskStatus::Failed, None, Some(message.clone()))
                        .await;
                    inner.lock().await.stats.tasks_failed += 1;
                    let _ = bus
                        .publish(
                            Event::for_task(EventKind::AgentError, agent.role(), &task_id)
                                .with_field("error", message),
                        )
                        .await;
                }
            }

            inner.lock().await.active_tasks.remove(&task_id);
        });

        self.inner.lock().await.active_tasks.insert(task_id_for_map, handle);
    }

    async fn on_health_check(&self, _event: Event) {
        let active = self.inner.lock().await.active_tasks.len();
        let _ = self
            .bus
            .publish(
                Event::new(EventKind::AgentHeartbeat, self.agent.role())
                    .with_field("active_tasks", active as u64),
            )
            .await;
    }
}

impl<A: Agent> AgentRuntime<A> {
    pub fn new(agent: A, bus: Arc<dyn EventBus>, store: Arc<Store>) -> Self {
        Self {
            agent: Arc::new(agent),
            bus,
            store,
            inner: Arc::new(Mutex::new(RuntimeInner {
                active_tasks: HashMap::new(),
                stats: AgentStats::default(),
            })),
            subscriptions: Mutex::new(Vec::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn role(&self) -> &str {
        self.agent.role()
    }

    pub async fn stats(&self) -> AgentStats {
        self.inner.lock().await.stats.clone()
    }

    /// Subscribes to the four lifecycle event kinds this runtime handles
    /// and announces itself with `AgentStarted`.
    pub async fn start(&self) -> Result<()> {
        self.shutting_down.store(false, Ordering::SeqCst);
        let handler: Arc<dyn EventHandler> = Arc::new(DispatchHandler {
            agent: self.agent.clone(),
            bus: self.bus.clone(),
            store: self.store.clone(),
            inner: self.inner.clone(),
            shutting_down: self.shutting_down.clone(),
        });

        let mut subscriptions = self.subscriptions.lock().await;
        let mut kinds = vec![
            EventKind::TaskAssigned,
            EventKind::TaskRetry,
            EventKind::SystemHealthCheck,
            EventKind::SystemShutdown,
        ];
        if !self.agent.custom_event_names().is_empty() {
            kinds.push(EventKind::Custom);
        }
        for kind in kinds {
            let id = self.bus.subscribe(kind, handler.clone()).await?;
            subscriptions.push((kind, id));
        }
        drop(subscriptions);

        self.bus
            .publish(Event::new(EventKind::AgentStarted, self.agent.role()))
            .await?;
        info!(role = self.agent.role(), "agent runtime started");
        Ok(())
    }

    /// Unsubscribes, waits for any in-flight task handlers to finish (their
    /// terminal `TaskCompleted`/`TaskFailed` event is still observed even if
    /// a `SystemShutdown` arrived mid-task), and announces `AgentStopped`.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        let mut subscriptions = self.subscriptions.lock().await;
        for (kind, id) in subscriptions.drain(..) {
            let _ = self.bus.unsubscribe(kind, id).await;
        }
        drop(subscriptions);

        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock().await;
            inner.active_tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        let _ = self
            .bus
            .publish(Event::new(EventKind::AgentStopped, self.agent.role()))
            .await;
        info!(role = self.agent.role(), "agent runtime shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessEventBus;
    use crate::store::state_path;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoAgent {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn role(&self) -> &str {
            "frontend_agent"
        }

        fn can_handle(&self, description: &str) -> bool {
            description.contains("UI")
        }

        async fn execute(&self, task: &crate::store::Task) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("handled {}", task.id))
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    #[tokio::test]
    async fn dispatches_assigned_task_and_marks_completed() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::store::Store::load(state_path(dir.path())).await.unwrap());
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let runtime = AgentRuntime::new(EchoAgent { calls: calls.clone() }, bus.clone(), store.clone());
        runtime.start().await.unwrap();

        bus.publish(
            Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1")
                .with_field("assigned_agent", "frontend_agent"),
        )
        .await
        .unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let task = store.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn ignores_tasks_assigned_to_other_agents() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::store::Store::load(state_path(dir.path())).await.unwrap());
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the API", "backend_agent").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let runtime = AgentRuntime::new(EchoAgent { calls: calls.clone() }, bus.clone(), store.clone());
        runtime.start().await.unwrap();

        bus.publish(
            Event::for_task(EventKind::TaskAssigned, "orchestrator", "t1")
                .with_field("assigned_agent", "backend_agent"),
        )
        .await
        .unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        runtime.shutdown().await.unwrap();
    }
}
