//! The common event envelope and the closed set of event kinds every
//! component (bus, store, agent runtime, orchestrator) agrees on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// The closed set of event kinds. `Custom` carries its own sub-name in
/// `data.event_name` rather than expanding this enum, so role-specific
/// signaling (e.g. `backend_metrics`) doesn't require a wire format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetry,
    FeatureCreated,
    FeatureStarted,
    FeatureCompleted,
    FeatureBlocked,
    AgentStarted,
    AgentStopped,
    AgentHeartbeat,
    AgentError,
    SystemShutdown,
    SystemHealthCheck,
    Custom,
}

impl EventKind {
    /// The brokered backend's topic name for this kind (`events.<kind>`).
    pub fn topic(&self) -> String {
        let name = serde_json::to_value(self)
            .expect("EventKind always serializes")
            .as_str()
            .expect("EventKind serializes to a string")
            .to_string();
        format!("events.{name}")
    }
}

/// A flat or shallowly nested payload keyed by short string names. Values are
/// `serde_json::Value` so role handlers can carry whatever shape they need
/// without widening the envelope's own schema.
pub type EventData = HashMap<String, Value>;

/// The wire/in-memory shape every event takes, per the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source: String,
    /// Milliseconds since the epoch, monotonic per-source.
    pub timestamp: i64,
    #[serde(default)]
    pub data: EventData,
    pub correlation_id: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data: HashMap::new(),
            correlation_id: None,
        }
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Convenience constructor for the common case of a task-scoped event:
    /// `correlation_id` is the task id and `task_id` is also placed in `data`
    /// so handlers that only look at `data` still find it.
    pub fn for_task(kind: EventKind, source: impl Into<String>, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Event::new(kind, source)
            .with_field("task_id", task_id.clone())
            .with_correlation_id(task_id)
    }

    /// For the `Custom` kind: attach the sub-event name used for
    /// extensibility (e.g. `"new_feature_request"`).
    pub fn custom(source: impl Into<String>, event_name: impl Into<String>) -> Self {
        Event::new(EventKind::Custom, source).with_field("event_name", event_name.into())
    }

    /// Reads `data.event_name`, the sub-name for `Custom` events.
    pub fn custom_event_name(&self) -> Option<&str> {
        self.data.get("event_name").and_then(Value::as_str)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_matches_kind() {
        assert_eq!(EventKind::TaskAssigned.topic(), "events.task_assigned");
        assert_eq!(EventKind::Custom.topic(), "events.custom");
    }

    #[test]
    fn round_trips_through_json() {
        let event = Event::for_task(EventKind::TaskAssigned, "orchestrator", "task-1")
            .with_field("assigned_agent", "backend_agent");

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.kind, event.kind);
        assert_eq!(decoded.correlation_id, event.correlation_id);
        assert_eq!(decoded.field_str("assigned_agent"), Some("backend_agent"));
    }

    #[test]
    fn custom_event_name_roundtrips() {
        let event = Event::custom("backend_agent", "api_created");
        assert_eq!(event.custom_event_name(), Some("api_created"));
    }
}
