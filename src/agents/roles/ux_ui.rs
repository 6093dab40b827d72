use super::{classify, generate_and_place};
use crate::agents::Agent;
use crate::external::{ArtifactSink, LlmClient, NamingHints, PlacementMode, PlacementStrategy};
use crate::store::Task;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("color", &["color", "palette", "theme"]),
    ("typography", &["typography", "font", "text"]),
    ("spacing", &["spacing", "padding", "margin"]),
    ("layout", &["layout", "grid", "responsive"]),
    ("animation", &["animation", "transition", "interaction"]),
];

pub struct UxUiAgent {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ArtifactSink>,
}

impl UxUiAgent {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { llm, sink }
    }

    fn subtype(description: &str) -> &'static str {
        classify(description, CATEGORIES).unwrap_or("generic")
    }
}

#[async_trait]
impl Agent for UxUiAgent {
    fn role(&self) -> &str {
        "ux_ui_agent"
    }

    fn can_handle(&self, description: &str) -> bool {
        classify(description, CATEGORIES).is_some()
    }

    async fn execute(&self, task: &Task) -> Result<String> {
        let subtype = Self::subtype(&task.description);
        let prompt = format!(
            "Define design tokens ({subtype}) for the following task:\n{}",
            task.description
        );
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("src/styles".to_string()),
            naming_hints: NamingHints {
                prefix: Some(subtype.to_string()),
                extension: Some("css".to_string()),
            },
        };
        generate_and_place(&self.llm, &self.sink, &prompt, Some(1024), strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_color() {
        assert_eq!(UxUiAgent::subtype("pick a new color palette"), "color");
    }
}
