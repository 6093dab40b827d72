use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::event::{Event, EventKind};
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("api_route", &["api", "endpoint", "route", "rest"]),
    ("service", &["service", "business logic", "handler"]),
    ("middleware", &["middleware", "auth", "validation"]),
    ("integration", &["integration", "third-party", "external"]),
    ("update", &["update", "modify", "change", "fix"]),
];

const CUSTOM_EVENTS: &[&str] = &["api_validation_request", "database_schema_updated"];

pub struct BackendAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
    bus: Arc<dyn crate::bus::EventBus>,
}

impl BackendAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>, bus: Arc<dyn crate::bus::EventBus>) -> Self {
        Self { llm, sink, bus }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for BackendAgent {
    fn role(&self) -> &str {
        "backend_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Generate backend code ({subtype}) for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("src/server".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("rs".to_string()),
            },
        };
        let result = generate_and_place(&self.llm, &self.sink, &prompt, Some(2048), strategy).await;

        match &result {
            Ok(_) => {
                let _ = self
                    .bus
                    .publish(Event::custom(self.role(), "api_created").with_field("task_id", task.id.clone()))
                    .await;
            }
            Err(e) => {
                let _ = self
                    .bus
                    .publish(
                        Event::custom(self.role(), "backend_error")
                            .with_field("task_id", task.id.clone())
                            .with_field("error", e.to_string()),
                    )
                    .await;
            }
        }

        let _ = self
            .bus
            .publish(Event::custom(self.role(), "backend_metrics").with_field("subtype", subtype))
            .await;

        result
    }

    fn custom_event_names(&self) -> &[&str] {
        CUSTOM_EVENTS
    }

    async fn handle_custom_event(&self, event_name: &str, event: &Event) {
        tracing::debug!(event_name, event_id = %event.id, "backend_agent received custom event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_route() {
        assert_eq!(BackendAgent::subtype("add a new REST endpoint"), "api_route");
    }
}
