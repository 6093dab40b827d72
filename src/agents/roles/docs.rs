use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("api_docs", &["api", "endpoint", "reference"]),
    ("guide", &["guide", "tutorial", "how-to"]),
    ("readme", &["readme", "overview"]),
];

pub struct DocsAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl DocsAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for DocsAgent {
    fn role(&self) -> &str {
        "docs_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Write {subtype} documentation for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("docs".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("md".to_string()),
            },
        };
        generate_and_place(&self.llm, &self.sink, &prompt, Some(1024), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_readme() {
        assert_eq!(DocsAgent::subtype("write a README overview"), "readme");
    }
}
