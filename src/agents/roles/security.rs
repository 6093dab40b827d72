use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("audit", &["audit", "review", "analyze", "check", "assess"]),
    ("implement", &["implement", "add", "create", "secure"]),
];

pub struct SecurityAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl SecurityAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn role(&self) -> &str {
        "security_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Perform a security {subtype} for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("security".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("md".to_string()),
            },
        };
        generate_and_place(&self.llm, &self.sink, &prompt, Some(1536), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_audit() {
        assert_eq!(SecurityAgent::subtype("review the auth flow"), "audit");
    }
}
