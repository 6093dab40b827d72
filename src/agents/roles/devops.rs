use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CONCERN_TAGS: &[(&str, &[&str])] = &[
    ("docker", &["docker", "container", "dockerfile"]),
    ("ci_cd", &["github action", "ci", "cd", "pipeline", "workflow"]),
    ("kubernetes", &["kubernetes", "k8s", "helm"]),
    ("deploy", &["vercel", "netlify", "deploy"]),
    ("infrastructure", &["terraform", "infrastructure"]),
    ("server", &["nginx", "apache", "server"]),
    ("observability", &["monitor", "logging", "observability"]),
];

pub struct DevopsAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl DevopsAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    /// Unlike the other roles, devops concerns are not mutually exclusive:
    /// a task can be tagged `docker` and `ci_cd` at once.
    fn matched_tags(description: &str) -> Vec<&'static str> {
        let lower = description.to_lowercase();
        CONCERN_TAGS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
            .map(|(tag, _)| *tag)
            .collect()
    }
}

#[async_trait]
impl Agent for DevopsAgent {
    fn role(&self) -> &str {
        "devops_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        !Self::matched_tags(description).is_empty()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let tags = Self::matched_tags(&task.description);
        let context = if tags.is_empty() {
            "general infrastructure".to_string()
        } else {
            tags.join(", ")
        };
        let prompt = format!(
            "Generate infrastructure configuration (concerns: {context}) for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("infra".to_string()),
            naming_hints: NamingHints {
                prefix: Some("devops".to_string()),
                extension: Some("yaml".to_string()),
            },
        };
        super::generate_and_place(&self.llm, &self.sink, &prompt, Some(1536), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_multiple_independent_tags() {
        let tags = DevopsAgent::matched_tags("set up a Dockerfile and a GitHub Action pipeline");
        assert!(tags.contains(&"docker"));
        assert!(tags.contains(&"ci_cd"));
    }
}
