use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("integration", &["integration", "api", "endpoint"]),
    ("e2e", &["e2e", "end-to-end", "ui test", "user flow"]),
];

pub struct QaAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl QaAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("unit")
    }
}

#[async_trait]
impl Agent for QaAgent {
    fn role(&self) -> &str {
        "qa_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        // Every task is a candidate for some level of test coverage; the
        // orchestrator still only routes tasks explicitly decomposed for
        // this role.
        !description.trim().is_empty()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Write {subtype} tests for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("tests".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("rs".to_string()),
            },
        };
        generate_and_place(&self.llm, &self.sink, &prompt, Some(1536), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unit() {
        assert_eq!(QaAgent::subtype("write tests for the parser"), "unit");
    }

    #[test]
    fn classifies_e2e() {
        assert_eq!(QaAgent::subtype("write an end-to-end user flow test"), "e2e");
    }
}
