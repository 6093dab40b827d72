use thiserror::Error;

/// Convenience type alias for Results with [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Every error the runtime can produce, grouped by the tier that handles it.
///
/// Tier 1 (configuration) and tier 4 (store) are fatal; tier 2 (collaborator)
/// and tier 5 (handler panics) are surfaced as task- or event-scoped failures;
/// tier 3 (transport) is retried internally before escalating.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("store persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("event bus error: {0}")]
    EventBus(String),

    #[error("unknown event bus backend: {0}")]
    UnknownBackend(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("invalid task transition: {task_id} {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("unknown agent role: {0}")]
    UnknownRole(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
