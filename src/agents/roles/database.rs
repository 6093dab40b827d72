use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::event::Event;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("migration", &["migration", "migrate", "alter"]),
    ("schema", &["schema", "table", "design", "structure"]),
    ("index", &["index", "performance", "optimize"]),
    ("rls", &["rls", "security", "policy", "permission"]),
    ("update", &["update", "modify", "change"]),
];

pub struct DatabaseAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
    bus: Arc<dyn crate::bus::EventBus>,
}

impl DatabaseAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>, bus: Arc<dyn crate::bus::EventBus>) -> Self {
        Self { llm, sink, bus }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for DatabaseAgent {
    fn role(&self) -> &str {
        "db_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Generate a database {subtype} for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("migrations".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("sql".to_string()),
            },
        };
        let result = generate_and_place(&self.llm, &self.sink, &prompt, Some(1536), strategy).await;

        if result.is_ok() && matches!(subtype, "schema" | "migration") {
            let _ = self
                .bus
                .publish(Event::custom(self.role(), "database_schema_updated").with_field("task_id", task.id.clone()))
                .await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_migration_over_update() {
        assert_eq!(DatabaseAgent::subtype("write a migration to alter the users table"), "migration");
    }
}
