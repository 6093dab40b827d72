//! The orchestrator control plane: feature decomposition, assignment,
//! completion/blocking detection, and periodic maintenance. Grounded on the
//! original `AgentOrchestrator`'s run loop (subscribe, dispatch, periodic
//! timers) and `event_driven_orchestrator_agent.py`'s decompose/assign/
//! retry/recover semantics.

use crate::agents::roles::normalize_role_name;
use crate::bus::{EventBus, EventHandler, SubscriptionId};
use crate::event::{Event, EventKind};
use crate::external::TaskDecomposer;
use crate::store::{FeatureStatus, Store, TaskStatus};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct OrchestratorConfig {
    pub enabled_roles: Vec<String>,
    pub stall_timeout: Duration,
    pub max_retries: u32,
    pub cleanup_retention: Duration,
    pub health_check_interval: Duration,
    pub recovery_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled_roles: crate::constants::AGENT_ROLES.iter().map(|s| s.to_string()).collect(),
            stall_timeout: crate::constants::DEFAULT_STALL_TIMEOUT,
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            cleanup_retention: crate::constants::DEFAULT_CLEANUP_RETENTION,
            health_check_interval: crate::constants::HEALTH_CHECK_INTERVAL,
            recovery_interval: crate::constants::RECOVERY_INTERVAL,
            cleanup_interval: crate::constants::CLEANUP_INTERVAL,
        }
    }
}

/// Tracks task ids with an outstanding, unanswered `TaskAssigned`. Entered
/// on publication, cleared on any terminal status or a recovery-driven
/// reset to `Pending`, so the orchestrator never issues two assignments
/// for the same task.
struct AssignmentGuard {
    outstanding: Mutex<HashSet<String>>,
}

impl AssignmentGuard {
    fn new() -> Self {
        Self {
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    async fn try_enter(&self, task_id: &str) -> bool {
        self.outstanding.lock().await.insert(task_id.to_string())
    }

    async fn clear(&self, task_id: &str) {
        self.outstanding.lock().await.remove(task_id);
    }
}

pub struct Orchestrator {
    bus: Arc<dyn EventBus>,
    store: Arc<Store>,
    decomposer: Arc<dyn TaskDecomposer>,
    config: OrchestratorConfig,
    assignment_guard: Arc<AssignmentGuard>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
    maintenance_handle: Mutex<Option<JoinHandle<()>>>,
}

struct OrchestratorHandler {
    bus: Arc<dyn EventBus>,
    store: Arc<Store>,
    decomposer: Arc<dyn TaskDecomposer>,
    config_roles: Vec<String>,
    max_retries: u32,
    assignment_guard: Arc<AssignmentGuard>,
}

#[async_trait]
impl EventHandler for OrchestratorHandler {
    async fn handle(&self, event: Event) {
        match event.kind {
            EventKind::FeatureCreated => self.on_feature_created(&event).await,
            EventKind::Custom if event.custom_event_name() == Some("new_feature_request") => {
                self.on_feature_created(&event).await
            }
            EventKind::TaskCompleted => self.on_task_completed(&event).await,
            EventKind::TaskFailed => self.on_task_failed(&event).await,
            _ => {}
        }
    }
}

impl OrchestratorHandler {
    async fn on_feature_created(&self, event: &Event) {
        let feature_id = event
            .field_str("feature_id")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let description = event.field_str("description").unwrap_or_default().to_string();

        if self.store.get_feature(&feature_id).await.is_none() {
            if let Err(e) = self.store.add_feature(&feature_id, &description).await {
                error!(feature_id, error = %e, "failed to record feature");
                return;
            }
        }
        if let Err(e) = self.store.set_feature_status(&feature_id, FeatureStatus::InProgress).await {
            error!(feature_id, error = %e, "failed to mark feature in progress");
            return;
        }

        let pairs = match self.decomposer.decompose(&description).await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(feature_id, error = %e, "decomposition failed");
                let _ = self.store.set_feature_status(&feature_id, FeatureStatus::Failed).await;
                return;
            }
        };

        let valid_pairs: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(role, _)| self.config_roles.iter().any(|r| r == role))
            .collect();

        if valid_pairs.is_empty() {
            warn!(feature_id, "decomposition yielded no valid role assignments");
            let _ = self.store.set_feature_status(&feature_id, FeatureStatus::Failed).await;
            return;
        }

        for (role, task_description) in valid_pairs {
            let task_id = Uuid::new_v4().to_string();
            if let Err(e) = self.store.add_task(&task_id, &feature_id, &task_description, &role).await {
                error!(task_id, error = %e, "failed to record task");
                continue;
            }
            self.assign(&task_id, &role).await;
        }
    }

    async fn assign(&self, task_id: &str, role: &str) {
        if !self.assignment_guard.try_enter(task_id).await {
            return;
        }
        let _ = self
            .bus
            .publish(
                Event::for_task(EventKind::TaskAssigned, "orchestrator", task_id)
                    .with_field("assigned_agent", role),
            )
            .await;
    }

    async fn on_task_completed(&self, event: &Event) {
        let Some(task_id) = event.field_str("task_id") else { return };
        self.assignment_guard.clear(task_id).await;

        let Some(task) = self.store.get_task(task_id).await else { return };
        let siblings = self.store.get_feature_tasks(&task.feature_id).await;
        if siblings.iter().all(|t| t.status == TaskStatus::Completed) {
            let _ = self.store.set_feature_status(&task.feature_id, FeatureStatus::Completed).await;
            let _ = self
                .bus
                .publish(Event::new(EventKind::FeatureCompleted, "orchestrator").with_field("feature_id", task.feature_id))
                .await;
        }
    }

    async fn on_task_failed(&self, event: &Event) {
        let Some(task_id) = event.field_str("task_id").map(str::to_string) else { return };
        self.assignment_guard.clear(&task_id).await;

        let Some(task) = self.store.get_task(&task_id).await else { return };
        if task.retry_count < self.max_retries {
            if let Err(e) = self
                .store
                .update_task_status(&task_id, TaskStatus::Pending, None, None)
                .await
            {
                warn!(task_id, error = %e, "failed to reset task for retry");
                return;
            }
            let _ = self
                .bus
                .publish(
                    Event::for_task(EventKind::TaskRetry, "orchestrator", &task_id)
                        .with_field("assigned_agent", task.assigned_agent.clone()),
                )
                .await;
            self.assignment_guard.try_enter(&task_id).await;
            return;
        }

        if let Err(e) = self
            .store
            .update_task_status(&task_id, TaskStatus::PermanentlyFailed, None, None)
            .await
        {
            warn!(task_id, error = %e, "failed to mark task permanently failed");
        }

        let siblings = self.store.get_feature_tasks(&task.feature_id).await;
        let any_permanently_failed = siblings.iter().any(|t| t.status == TaskStatus::PermanentlyFailed);
        let none_active = siblings.iter().all(|t| t.status.is_terminal());
        if any_permanently_failed && none_active {
            let _ = self.store.set_feature_status(&task.feature_id, FeatureStatus::Blocked).await;
            let _ = self
                .bus
                .publish(Event::new(EventKind::FeatureBlocked, "orchestrator").with_field("feature_id", task.feature_id))
                .await;
        }
    }
}

impl Orchestrator {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<Store>,
        decomposer: Arc<dyn TaskDecomposer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            bus,
            store,
            decomposer,
            config,
            assignment_guard: Arc::new(AssignmentGuard::new()),
            subscriptions: Mutex::new(Vec::new()),
            maintenance_handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handler: Arc<dyn EventHandler> = Arc::new(OrchestratorHandler {
            bus: self.bus.clone(),
            store: self.store.clone(),
            decomposer: self.decomposer.clone(),
            config_roles: self.config.enabled_roles.clone(),
            max_retries: self.config.max_retries,
            assignment_guard: self.assignment_guard.clone(),
        });

        let mut subscriptions = self.subscriptions.lock().await;
        for kind in [
            EventKind::FeatureCreated,
            EventKind::Custom,
            EventKind::TaskCompleted,
            EventKind::TaskFailed,
        ] {
            let id = self.bus.subscribe(kind, handler.clone()).await?;
            subscriptions.push((kind, id));
        }
        drop(subscriptions);

        *self.maintenance_handle.lock().await = Some(self.spawn_maintenance_loop());
        info!("orchestrator started");
        Ok(())
    }

    fn spawn_maintenance_loop(&self) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let store = self.store.clone();
        let stall_timeout = self.config.stall_timeout;
        let max_retries = self.config.max_retries;
        let cleanup_retention = self.config.cleanup_retention;
        let assignment_guard = self.assignment_guard.clone();

        let mut health_tick = tokio::time::interval(self.config.health_check_interval);
        let mut recovery_tick = tokio::time::interval(self.config.recovery_interval);
        let mut cleanup_tick = tokio::time::interval(self.config.cleanup_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = health_tick.tick() => {
                        let report = store.task_health_check().await;
                        info!(healthy = report.healthy, stalled = report.stalled_tasks.len(), "periodic health check");
                        let _ = bus.publish(Event::new(EventKind::SystemHealthCheck, "orchestrator")).await;
                    }
                    _ = recovery_tick.tick() => {
                        if let Ok(recovered) = store.recover_stalled_tasks(stall_timeout).await {
                            for task_id in &recovered {
                                assignment_guard.clear(task_id).await;
                            }
                            reassign_pending(&bus, &store, &assignment_guard, &recovered).await;
                        }
                        if let Ok(retried) = store.retry_failed_tasks(max_retries).await {
                            for task_id in &retried {
                                assignment_guard.clear(task_id).await;
                            }
                            reassign_pending(&bus, &store, &assignment_guard, &retried).await;
                        }
                    }
                    _ = cleanup_tick.tick() => {
                        let _ = store.cleanup_completed_tasks(cleanup_retention).await;
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        for (kind, id) in subscriptions.drain(..) {
            let _ = self.bus.unsubscribe(kind, id).await;
        }
        if let Some(handle) = self.maintenance_handle.lock().await.take() {
            handle.abort();
        }
        info!("orchestrator shut down");
        Ok(())
    }
}

async fn reassign_pending(
    bus: &Arc<dyn EventBus>,
    store: &Arc<Store>,
    assignment_guard: &Arc<AssignmentGuard>,
    task_ids: &[String],
) {
    for task_id in task_ids {
        let Some(task) = store.get_task(task_id).await else { continue };
        if task.status != TaskStatus::Pending {
            continue;
        }
        if !assignment_guard.try_enter(task_id).await {
            continue;
        }
        let _ = bus
            .publish(
                Event::for_task(EventKind::TaskAssigned, "orchestrator", task_id)
                    .with_field("assigned_agent", task.assigned_agent.clone()),
            )
            .await;
    }
}

/// Normalizes a role returned by a decomposer into the canonical set used
/// for the enabled-roles allow-list check. Exposed for callers building
/// decomposer adapters outside [`crate::external`].
pub fn normalize_role(raw: &str) -> Option<&'static str> {
    normalize_role_name(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessEventBus;
    use crate::store::state_path;

    struct FixedDecomposer(Vec<(String, String)>);

    #[async_trait]
    impl TaskDecomposer for FixedDecomposer {
        async fn decompose(&self, _description: &str) -> Result<Vec<(String, String)>> {
            Ok(self.0.clone())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    #[tokio::test]
    async fn feature_created_assigns_tasks_for_valid_roles() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::load(state_path(dir.path())).await.unwrap());
        let decomposer: Arc<dyn TaskDecomposer> = Arc::new(FixedDecomposer(vec![
            ("frontend_agent".to_string(), "build the login UI".to_string()),
            ("time_traveler_agent".to_string(), "not a real role".to_string()),
        ]));

        let orchestrator = Orchestrator::new(bus.clone(), store.clone(), decomposer, OrchestratorConfig::default());
        orchestrator.start().await.unwrap();

        bus.publish(
            Event::new(EventKind::FeatureCreated, "cli")
                .with_field("feature_id", "f1")
                .with_field("description", "add login"),
        )
        .await
        .unwrap();
        settle().await;

        let tasks = store.get_feature_tasks("f1").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assigned_agent, "frontend_agent");

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn feature_with_no_valid_roles_is_marked_failed() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::load(state_path(dir.path())).await.unwrap());
        let decomposer: Arc<dyn TaskDecomposer> = Arc::new(FixedDecomposer(vec![]));

        let orchestrator = Orchestrator::new(bus.clone(), store.clone(), decomposer, OrchestratorConfig::default());
        orchestrator.start().await.unwrap();

        bus.publish(
            Event::new(EventKind::FeatureCreated, "cli")
                .with_field("feature_id", "f1")
                .with_field("description", "do nothing sensible"),
        )
        .await
        .unwrap();
        settle().await;

        let feature = store.get_feature("f1").await.unwrap();
        assert_eq!(feature.status, FeatureStatus::Failed);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn task_completion_completes_the_feature_when_all_siblings_are_done() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::load(state_path(dir.path())).await.unwrap());
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();
        store
            .update_task_status("t1", TaskStatus::Completed, Some("done".to_string()), None)
            .await
            .unwrap();

        let decomposer: Arc<dyn TaskDecomposer> = Arc::new(FixedDecomposer(vec![]));
        let orchestrator = Orchestrator::new(bus.clone(), store.clone(), decomposer, OrchestratorConfig::default());
        orchestrator.start().await.unwrap();

        bus.publish(Event::for_task(EventKind::TaskCompleted, "frontend_agent", "t1"))
            .await
            .unwrap();
        settle().await;

        let feature = store.get_feature("f1").await.unwrap();
        assert_eq!(feature.status, FeatureStatus::Completed);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn task_failure_under_retry_cap_republishes_retry() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::new());
        bus.start().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::load(state_path(dir.path())).await.unwrap());
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();

        let decomposer: Arc<dyn TaskDecomposer> = Arc::new(FixedDecomposer(vec![]));
        let orchestrator = Orchestrator::new(bus.clone(), store.clone(), decomposer, OrchestratorConfig::default());
        orchestrator.start().await.unwrap();

        let retried = Arc::new(tokio::sync::Mutex::new(false));
        let retried_clone = retried.clone();
        bus.subscribe(
            EventKind::TaskRetry,
            Arc::new(crate::bus::FnHandler(move |_event| {
                let retried = retried_clone.clone();
                async move {
                    *retried.lock().await = true;
                }
            })),
        )
        .await
        .unwrap();

        bus.publish(
            Event::for_task(EventKind::TaskFailed, "frontend_agent", "t1")
                .with_field("error", "boom"),
        )
        .await
        .unwrap();
        settle().await;

        assert!(*retried.lock().await);
        let task = store.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        orchestrator.shutdown().await.unwrap();
    }
}
