//! The task/feature store: the authoritative, durable table every other
//! component reads and mutates through. Grounded on the original
//! `ProjectStateManager` (field set, recovery/retry/health/cleanup/
//! statistics semantics) with one deliberate improvement: persistence here
//! is write-temp-then-rename, not a whole-file overwrite, per §3.4's
//! atomicity requirement. Locking discipline (single exclusive lock, clone-
//! mutate-persist-commit so a failed write never leaves the in-memory table
//! ahead of disk) follows the same care as `atomic_state.rs`'s
//! `AtomicTaskStateManager`.

use crate::constants::{
    DEFAULT_LONG_RUNNING_THRESHOLD, DEFAULT_MAX_RETRIES, DEFAULT_STALL_TIMEOUT,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    PermanentlyFailed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::PermanentlyFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    New,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub feature_id: String,
    pub description: String,
    pub assigned_agent: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub description: String,
    pub status: FeatureStatus,
    pub created_at: DateTime<Utc>,
    pub task_ids: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreDocument {
    features: HashMap<String, Feature>,
    tasks: HashMap<String, Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status_counts: HashMap<String, usize>,
    pub stalled_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub long_running_tasks: Vec<String>,
    pub issues: Vec<String>,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_agent: HashMap<String, usize>,
    pub completion_rate: f64,
    pub average_retry_count: f64,
    pub tasks_with_errors: usize,
}

/// A single logical table, guarded by one exclusive lock, persisted
/// atomically on every mutation.
pub struct Store {
    state: Mutex<StoreDocument>,
    path: PathBuf,
}

impl Store {
    /// Loads the store from `path`, or starts empty if the file is absent
    /// or unparseable (a corrupt document is logged and discarded, not
    /// treated as fatal — a fresh artifact is written on the next
    /// mutation).
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "store file unparseable, starting empty");
                StoreDocument::default()
            }),
            Err(_) => StoreDocument::default(),
        };

        Ok(Self {
            state: Mutex::new(document),
            path,
        })
    }

    async fn persist(&self, document: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &payload).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Runs `mutate` against a clone of the current document, persists the
    /// clone, and only then commits it as the new in-memory state. A
    /// persistence failure leaves both disk and memory at the pre-mutation
    /// state.
    async fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut StoreDocument) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock().await;
        let mut candidate = guard.clone();
        let result = mutate(&mut candidate)?;
        self.persist(&candidate).await?;
        *guard = candidate;
        Ok(result)
    }

    pub async fn add_feature(&self, id: &str, description: &str) -> Result<()> {
        let id = id.to_string();
        let description = description.to_string();
        self.mutate(move |doc| {
            doc.features.insert(
                id.clone(),
                Feature {
                    id,
                    description,
                    status: FeatureStatus::New,
                    created_at: Utc::now(),
                    task_ids: Vec::new(),
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn set_feature_status(&self, id: &str, status: FeatureStatus) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |doc| {
            let feature = doc
                .features
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("feature {id}")))?;
            feature.status = status;
            Ok(())
        })
        .await
    }

    pub async fn add_task(
        &self,
        id: &str,
        feature_id: &str,
        description: &str,
        assigned_agent: &str,
    ) -> Result<()> {
        let id = id.to_string();
        let feature_id = feature_id.to_string();
        let description = description.to_string();
        let assigned_agent = assigned_agent.to_string();
        self.mutate(move |doc| {
            let now = Utc::now();
            doc.tasks.insert(
                id.clone(),
                Task {
                    id: id.clone(),
                    feature_id: feature_id.clone(),
                    description,
                    assigned_agent,
                    status: TaskStatus::Pending,
                    created_at: now,
                    updated_at: now,
                    started_at: None,
                    retry_count: 0,
                    last_error: None,
                    output: None,
                },
            );
            if let Some(feature) = doc.features.get_mut(&feature_id) {
                feature.task_ids.push(id);
            }
            Ok(())
        })
        .await
    }

    /// The lifecycle transition used by the agent runtime and the
    /// orchestrator: `Pending -> InProgress -> Completed | Failed`, and
    /// `Failed -> Pending` (retry) | `PermanentlyFailed` (retry cap
    /// exhausted). Policy-driven resets (`recover_stalled_tasks`,
    /// `retry_failed_tasks`) bypass this and mutate status directly, since
    /// they are not lifecycle events.
    pub async fn update_task_status(
        &self,
        id: &str,
        new_status: TaskStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |doc| {
            let task = doc
                .tasks
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

            if task.status.is_terminal() {
                return Err(Error::InvalidTransition {
                    task_id: id,
                    from: format!("{:?}", task.status),
                    to: format!("{new_status:?}"),
                });
            }

            match (task.status, new_status) {
                (TaskStatus::Pending, TaskStatus::InProgress) => {
                    if task.started_at.is_none() {
                        task.started_at = Some(Utc::now());
                    }
                }
                (TaskStatus::InProgress, TaskStatus::Completed) => {
                    task.output = output;
                }
                (TaskStatus::InProgress, TaskStatus::Failed) => {
                    task.retry_count += 1;
                    task.last_error = error;
                }
                (TaskStatus::Failed, TaskStatus::Pending) => {}
                (TaskStatus::Failed, TaskStatus::PermanentlyFailed) => {}
                (from, to) if from == to => {}
                (from, to) => {
                    return Err(Error::InvalidTransition {
                        task_id: id,
                        from: format!("{from:?}"),
                        to: format!("{to:?}"),
                    });
                }
            }

            task.status = new_status;
            task.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn increment_retry_count(&self, id: &str) -> Result<u32> {
        let id = id.to_string();
        self.mutate(move |doc| {
            let task = doc
                .tasks
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            task.retry_count += 1;
            Ok(task.retry_count)
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.state.lock().await.tasks.get(id).cloned()
    }

    pub async fn get_feature(&self, id: &str) -> Option<Feature> {
        self.state.lock().await.features.get(id).cloned()
    }

    pub async fn get_feature_tasks(&self, feature_id: &str) -> Vec<Task> {
        let guard = self.state.lock().await;
        guard
            .tasks
            .values()
            .filter(|t| t.feature_id == feature_id)
            .cloned()
            .collect()
    }

    pub async fn get_all_tasks(&self) -> Vec<Task> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    pub async fn get_all_features(&self) -> Vec<Feature> {
        self.state.lock().await.features.values().cloned().collect()
    }

    pub async fn get_pending_tasks_by_agent(&self, agent: &str) -> Vec<Task> {
        let guard = self.state.lock().await;
        let mut tasks: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| t.assigned_agent == agent && t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Resets every `InProgress` task whose `started_at` is older than
    /// `timeout` back to `Pending`, recording `last_error = "stalled"`.
    /// A task with a missing or malformed `started_at` is treated as
    /// stalled, not skipped.
    pub async fn recover_stalled_tasks(&self, timeout: Duration) -> Result<Vec<String>> {
        self.mutate(move |doc| {
            let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
            let mut recovered = Vec::new();
            for task in doc.tasks.values_mut() {
                if task.status != TaskStatus::InProgress {
                    continue;
                }
                let stalled = match task.started_at {
                    Some(started_at) => started_at < cutoff,
                    None => true,
                };
                if stalled {
                    task.status = TaskStatus::Pending;
                    task.last_error = Some("stalled".to_string());
                    task.updated_at = Utc::now();
                    recovered.push(task.id.clone());
                }
            }
            if !recovered.is_empty() {
                info!(count = recovered.len(), "recovered stalled tasks");
            }
            Ok(recovered)
        })
        .await
    }

    /// For each `Failed` task: back to `Pending` if under the retry cap,
    /// else `PermanentlyFailed`. Returns the ids sent back to `Pending`.
    pub async fn retry_failed_tasks(&self, max_retries: u32) -> Result<Vec<String>> {
        self.mutate(move |doc| {
            let mut retried = Vec::new();
            for task in doc.tasks.values_mut() {
                if task.status != TaskStatus::Failed {
                    continue;
                }
                if task.retry_count < max_retries {
                    task.status = TaskStatus::Pending;
                    retried.push(task.id.clone());
                } else {
                    task.status = TaskStatus::PermanentlyFailed;
                    tracing::error!(task_id = %task.id, "task permanently failed");
                }
                task.updated_at = Utc::now();
            }
            Ok(retried)
        })
        .await
    }

    pub async fn task_health_check(&self) -> HealthReport {
        self.task_health_check_with_thresholds(DEFAULT_STALL_TIMEOUT, DEFAULT_LONG_RUNNING_THRESHOLD)
            .await
    }

    pub async fn task_health_check_with_thresholds(
        &self,
        stall_timeout: Duration,
        long_running_threshold: Duration,
    ) -> HealthReport {
        let guard = self.state.lock().await;
        let now = Utc::now();
        let stall_cutoff = now - chrono::Duration::from_std(stall_timeout).unwrap_or_default();
        let long_running_cutoff =
            now - chrono::Duration::from_std(long_running_threshold).unwrap_or_default();

        let mut status_counts: HashMap<String, usize> = HashMap::new();
        let mut stalled_tasks = Vec::new();
        let mut failed_tasks = Vec::new();
        let mut long_running_tasks = Vec::new();
        let mut issues = Vec::new();

        for task in guard.tasks.values() {
            *status_counts.entry(format!("{:?}", task.status)).or_insert(0) += 1;

            match task.status {
                TaskStatus::InProgress => match task.started_at {
                    Some(started_at) if started_at < stall_cutoff => {
                        stalled_tasks.push(task.id.clone());
                    }
                    Some(started_at) if started_at < long_running_cutoff => {
                        long_running_tasks.push(task.id.clone());
                    }
                    None => {
                        issues.push(format!("task {} is in progress with no started_at", task.id));
                    }
                    _ => {}
                },
                TaskStatus::Failed | TaskStatus::PermanentlyFailed => {
                    failed_tasks.push(task.id.clone());
                }
                _ => {}
            }

            if !guard.features.contains_key(&task.feature_id) {
                issues.push(format!("task {} references missing feature {}", task.id, task.feature_id));
            }
        }

        let healthy =
            stalled_tasks.is_empty() && failed_tasks.is_empty() && long_running_tasks.is_empty() && issues.is_empty();

        HealthReport {
            status_counts,
            stalled_tasks,
            failed_tasks,
            long_running_tasks,
            issues,
            healthy,
        }
    }

    /// Removes `Completed`/`PermanentlyFailed` tasks whose `updated_at` is
    /// older than `keep`. Returns the count removed.
    pub async fn cleanup_completed_tasks(&self, keep: Duration) -> Result<usize> {
        self.mutate(move |doc| {
            let cutoff = Utc::now() - chrono::Duration::from_std(keep).unwrap_or_default();
            let before = doc.tasks.len();
            doc.tasks.retain(|_, task| {
                let terminal = matches!(task.status, TaskStatus::Completed | TaskStatus::PermanentlyFailed);
                !(terminal && task.updated_at < cutoff)
            });
            let removed = before - doc.tasks.len();
            if removed > 0 {
                info!(removed, "cleaned up completed tasks");
            }
            Ok(removed)
        })
        .await
    }

    pub async fn get_task_statistics(&self) -> TaskStatistics {
        let guard = self.state.lock().await;
        let total = guard.tasks.len();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_agent: HashMap<String, usize> = HashMap::new();
        let mut completed = 0usize;
        let mut retry_sum = 0u64;
        let mut tasks_with_errors = 0usize;

        for task in guard.tasks.values() {
            *by_status.entry(format!("{:?}", task.status)).or_insert(0) += 1;
            *by_agent.entry(task.assigned_agent.clone()).or_insert(0) += 1;
            if task.status == TaskStatus::Completed {
                completed += 1;
            }
            retry_sum += task.retry_count as u64;
            if task.last_error.is_some() {
                tasks_with_errors += 1;
            }
        }

        TaskStatistics {
            total,
            by_status,
            by_agent,
            completion_rate: if total == 0 { 0.0 } else { completed as f64 / total as f64 },
            average_retry_count: if total == 0 { 0.0 } else { retry_sum as f64 / total as f64 },
            tasks_with_errors,
        }
    }
}

pub fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Path helper matching spec §6.4 (`<root>/.maf/state.json`).
pub fn state_path(project_root: &Path) -> PathBuf {
    project_root.join(crate::constants::STATE_FILE_RELATIVE_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::load(state_path(dir.path())).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn add_task_registers_it_under_its_feature() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();

        let tasks = store.get_feature_tasks("f1").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn lifecycle_transition_sets_started_at_once() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();

        store
            .update_task_status("t1", TaskStatus::InProgress, None, None)
            .await
            .unwrap();
        let started_at_first = store.get_task("t1").await.unwrap().started_at;

        store
            .update_task_status("t1", TaskStatus::Failed, None, Some("boom".to_string()))
            .await
            .unwrap();
        store.update_task_status("t1", TaskStatus::Pending, None, None).await.ok();
        store
            .update_task_status("t1", TaskStatus::InProgress, None, None)
            .await
            .unwrap_or(());

        let task = store.get_task("t1").await.unwrap();
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.started_at, started_at_first);
    }

    #[tokio::test]
    async fn terminal_tasks_reject_further_transitions() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();
        store
            .update_task_status("t1", TaskStatus::Completed, Some("done".to_string()), None)
            .await
            .unwrap();

        let result = store.update_task_status("t1", TaskStatus::Pending, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recover_stalled_tasks_resets_to_pending() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();

        let recovered = store.recover_stalled_tasks(Duration::from_secs(0)).await.unwrap();
        assert_eq!(recovered, vec!["t1".to_string()]);

        let task = store.get_task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.last_error.as_deref(), Some("stalled"));
    }

    #[tokio::test]
    async fn retry_failed_tasks_honors_max_retries() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();
        store
            .update_task_status("t1", TaskStatus::Failed, None, Some("boom".to_string()))
            .await
            .unwrap();

        let retried = store.retry_failed_tasks(3).await.unwrap();
        assert_eq!(retried, vec!["t1".to_string()]);
        assert_eq!(store.get_task("t1").await.unwrap().status, TaskStatus::Pending);

        for _ in 0..3 {
            store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();
            store
                .update_task_status("t1", TaskStatus::Failed, None, Some("boom".to_string()))
                .await
                .unwrap();
        }
        store.retry_failed_tasks(3).await.unwrap();
        assert_eq!(
            store.get_task("t1").await.unwrap().status,
            TaskStatus::PermanentlyFailed
        );
    }

    #[tokio::test]
    async fn health_check_reports_sum_equal_to_total() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.add_task("t2", "f1", "build the API", "backend_agent").await.unwrap();

        let report = store.task_health_check().await;
        let sum: usize = report.status_counts.values().sum();
        assert_eq!(sum, 2);
        assert!(report.healthy);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_tasks() {
        let (store, _dir) = store().await;
        store.add_feature("f1", "add login").await.unwrap();
        store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        store.update_task_status("t1", TaskStatus::InProgress, None, None).await.unwrap();
        store
            .update_task_status("t1", TaskStatus::Completed, Some("done".to_string()), None)
            .await
            .unwrap();

        let removed = store.cleanup_completed_tasks(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_task("t1").await.is_none());
    }

    #[tokio::test]
    async fn persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = state_path(dir.path());
        {
            let store = Store::load(&path).await.unwrap();
            store.add_feature("f1", "add login").await.unwrap();
            store.add_task("t1", "f1", "build the UI", "frontend_agent").await.unwrap();
        }

        let reloaded = Store::load(&path).await.unwrap();
        let tasks = reloaded.get_all_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }
}
