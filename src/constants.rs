//! System-wide tunables. Most are overridable through configuration; the
//! values here are the defaults used when configuration is silent.

use std::time::Duration;

/// Events retained in an event bus's history ring buffer.
pub const EVENT_HISTORY_SIZE: usize = 1000;

/// Bounded worker pool size for handler dispatch on a single bus instance.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Soft cap on the delivery queue before the bus logs backpressure.
pub const DEFAULT_QUEUE_SOFT_CAP: usize = 10_000;

/// Retries allowed before a task is permanently failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// An `InProgress` task older than this is eligible for stall recovery.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Long-running threshold used by the health report; half the stall timeout.
pub const DEFAULT_LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Retention window for `cleanup_completed_tasks`.
pub const DEFAULT_CLEANUP_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Periodic maintenance cadences.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Path, relative to the project root, of the persisted store document.
pub const STATE_FILE_RELATIVE_PATH: &str = ".maf/state.json";

/// Canonical snake_case names of the specialized agent roles.
pub const AGENT_ROLES: &[&str] = &[
    "frontend_agent",
    "backend_agent",
    "db_agent",
    "devops_agent",
    "qa_agent",
    "docs_agent",
    "security_agent",
    "ux_ui_agent",
];
