//! `TaskDecomposer`: turns a feature description into `(role, description)`
//! pairs. Grounded on the original framework's LLM-driven task
//! decomposition step, which asks the model for a JSON array and then
//! normalizes whatever role names come back.

use crate::agents::roles::normalize_role_name;
use crate::external::LlmClient;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    async fn decompose(&self, description: &str) -> Result<Vec<(String, String)>>;
}

#[derive(Debug, Deserialize)]
struct RawTaskEntry {
    role: String,
    description: String,
}

/// Calls the LLM for a JSON array of `{role, description}` objects, then
/// normalizes each role through the fixed alias table. Entries whose role
/// doesn't normalize to a known agent are dropped and logged, not fatal.
pub struct LlmTaskDecomposer {
    llm: Arc<dyn LlmClient>,
}

impl LlmTaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskDecomposer for LlmTaskDecomposer {
    async fn decompose(&self, description: &str) -> Result<Vec<(String, String)>> {
        let prompt = format!(
            "Break the following feature request into a JSON array of tasks, each with a \
             \"role\" (one of frontend_agent, backend_agent, db_agent, devops_agent, qa_agent, \
             docs_agent, security_agent, ux_ui_agent) and a \"description\". Feature:\n{description}"
        );

        let Some(raw) = self.llm.generate(&prompt, Some(1024)).await? else {
            return Ok(Vec::new());
        };

        let entries: Vec<RawTaskEntry> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "task decomposer received unparseable JSON");
                return Ok(Vec::new());
            }
        };

        let mut pairs = Vec::new();
        for entry in entries {
            match normalize_role_name(&entry.role) {
                Some(canonical) => pairs.push((canonical.to_string(), entry.description)),
                None => warn!(role = %entry.role, "task decomposer dropped an unrecognized role"),
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::MockLlmClient;

    struct FixedLlmClient(&'static str);

    #[async_trait]
    impl LlmClient for FixedLlmClient {
        async fn generate(&self, _prompt: &str, _max_tokens: Option<u32>) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn normalizes_aliased_roles_and_drops_unknown() {
        let raw = r#"[
            {"role": "Frontend Developer Agent", "description": "build the login page"},
            {"role": "time_traveler_agent", "description": "not a real role"}
        ]"#;
        let decomposer = LlmTaskDecomposer::new(Arc::new(FixedLlmClient(raw)));

        let pairs = decomposer.decompose("add login").await.unwrap();
        assert_eq!(pairs, vec![("frontend_agent".to_string(), "build the login page".to_string())]);
    }

    #[tokio::test]
    async fn malformed_json_yields_no_pairs_not_an_error() {
        let decomposer = LlmTaskDecomposer::new(Arc::new(MockLlmClient));
        let pairs = decomposer.decompose("add login").await.unwrap();
        assert!(pairs.is_empty());
    }
}
