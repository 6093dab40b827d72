//! The eight specialized agent shells, plus the alias-normalization table
//! shared by the orchestrator (decomposition output) and the decomposer
//! collaborator. Each shell is a thin [`Agent`](super::Agent) implementation:
//! fixed role name, a keyword-based subtype classifier, and a
//! generate-then-place execution path.

pub mod backend;
pub mod database;
pub mod devops;
pub mod docs;
pub mod frontend;
pub mod qa;
pub mod security;
pub mod ux_ui;

pub use backend::BackendAgent;
pub use database::DatabaseAgent;
pub use devops::DevopsAgent;
pub use docs::DocsAgent;
pub use frontend::FrontendAgent;
pub use qa::QaAgent;
pub use security::SecurityAgent;
pub use ux_ui::UxUiAgent;

/// Canonical name, known aliases (case-sensitive as written by an LLM, but
/// matched case-insensitively).
const ROLE_ALIASES: &[(&str, &[&str])] = &[
    ("frontend_agent", &["Frontend Developer Agent", "frontend_developer_agent"]),
    ("backend_agent", &["Backend Developer Agent", "backend_developer_agent"]),
    ("db_agent", &["Database Architect Agent", "database_architect_agent"]),
    ("devops_agent", &["DevOps & Infrastructure Agent", "devops_infrastructure_agent"]),
    ("qa_agent", &["QA & Testing Agent", "qa_testing_agent"]),
    ("docs_agent", &["Documentation Agent", "documentation_agent"]),
    ("security_agent", &["Security Agent"]),
    ("ux_ui_agent", &["UX/UI Agent", "ux_ui_design_agent"]),
];

/// Normalizes a role name (canonical or any known alias, case-insensitive)
/// to its canonical snake_case form. `None` if the name is not recognized.
pub fn normalize_role_name(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    for (canonical, aliases) in ROLE_ALIASES {
        if raw.eq_ignore_ascii_case(canonical) {
            return Some(canonical);
        }
        if aliases.iter().any(|alias| raw.eq_ignore_ascii_case(alias)) {
            return Some(canonical);
        }
    }
    None
}

/// First matching category wins; `None` means the caller should fall back
/// to its own default subtype.
pub fn classify(
    description: &str,
    categories: &[(&'static str, &[&str])],
) -> Option<&'static str> {
    let lower = description.to_lowercase();
    for (subtype, keywords) in categories {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return Some(subtype);
        }
    }
    None
}

use crate::external::{ArtifactSink, LlmClient, PlacementStrategy};
use crate::Result;
use std::sync::Arc;

/// The canonical result payload a shell puts in a `TaskCompleted` event,
/// per §4.8: generate, then place, then report what happened.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShellResult {
    pub status: &'static str,
    pub path: Option<String>,
    pub action: String,
    pub message: String,
}

/// Shared by every role shell: call the LLM, place the result, and
/// serialize the outcome as the task's output text. A `None` from the LLM
/// (provider failure) surfaces as an `Err` so the caller's task is marked
/// `Failed`, not silently completed with empty output.
pub async fn generate_and_place(
    llm: &Arc<dyn LlmClient>,
    sink: &Arc<dyn ArtifactSink>,
    prompt: &str,
    max_tokens: Option<u32>,
    strategy: PlacementStrategy,
) -> Result<String> {
    let content = llm
        .generate(prompt, max_tokens)
        .await?
        .ok_or_else(|| crate::Error::Collaborator("llm returned no content".to_string()))?;

    let placement = sink.place(&content, &strategy).await?;

    let result = ShellResult {
        status: if placement.success { "success" } else { "error" },
        path: placement.path,
        action: format!("{:?}", placement.action).to_lowercase(),
        message: placement.error.unwrap_or_else(|| "artifact placed".to_string()),
    };

    Ok(serde_json::to_string(&result)?)
}
