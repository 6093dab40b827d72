use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("component", &["component", "button", "card", "modal"]),
    ("page", &["page", "screen", "view"]),
    ("form", &["form", "input", "field"]),
    ("update", &["update", "modify", "change", "fix"]),
];

pub struct FrontendAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl FrontendAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for FrontendAgent {
    fn role(&self) -> &str {
        "frontend_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Generate a React component ({subtype}) for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("src/components".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("tsx".to_string()),
            },
        };
        generate_and_place(&self.llm, &self.sink, &prompt, Some(2048), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{FilesystemArtifactSink, MockLlmClient};

    #[test]
    fn classifies_component_over_update() {
        assert_eq!(FrontendAgent::subtype("add a button component"), "component");
    }

    #[test]
    fn falls_back_to_generic() {
        assert_eq!(FrontendAgent::subtype("refactor the app shell"), "generic");
    }

    #[tokio::test]
    async fn execute_places_a_component_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = FrontendAgent::new(
            Arc::new(MockLlmClient),
            Arc::new(FilesystemArtifactSink::new(dir.path())),
        );
        let task = Task {
            id: "t1".to_string(),
            feature_id: "f1".to_string(),
            description: "add a login form component".to_string(),
            assigned_agent: "frontend_agent".to_string(),
            status: crate::store::TaskStatus::Pending,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            started_at: None,
            retry_count: 0,
            last_error: None,
            output: None,
        };

        let output = agent.execute(&task).await.unwrap();
        assert!(output.contains("success"));
    }
}
