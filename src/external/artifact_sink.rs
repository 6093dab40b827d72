//! Grounded on `BaseAgent.get_integration_strategy`/
//! `integrate_generated_content`: decide whether generated content creates
//! a new file, modifies an existing one, or is folded ("consolidated")
//! into a related file, then perform that placement on disk.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    Create,
    Modify,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingHints {
    pub prefix: Option<String>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementStrategy {
    pub mode: PlacementMode,
    pub target_file: Option<String>,
    pub target_dir: Option<String>,
    #[serde(default)]
    pub naming_hints: NamingHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementAction {
    Created,
    Modified,
    Consolidated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementResult {
    pub success: bool,
    pub path: Option<String>,
    pub action: PlacementAction,
    pub error: Option<String>,
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn place(&self, content: &str, strategy: &PlacementStrategy) -> Result<PlacementResult>;
}

/// Writes artifacts under a project root. Idempotent for identical
/// `(content, strategy)` pairs: when `target_file` is unset, the path is
/// derived deterministically from `(target_dir, naming_hints, content)`
/// rather than a random name, so repeating the same call resolves to the
/// same path and is a safe overwrite, never a duplicate file.
pub struct FilesystemArtifactSink {
    project_root: PathBuf,
}

impl FilesystemArtifactSink {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Derives a path deterministically from `(target_dir, naming_hints,
    /// content)` so that `place` called twice with identical arguments
    /// yields the same path, rather than a fresh random name each time.
    fn resolve_create_path(&self, content: &str, strategy: &PlacementStrategy) -> PathBuf {
        if let Some(target_file) = &strategy.target_file {
            return PathBuf::from(target_file);
        }

        let dir = strategy.target_dir.clone().unwrap_or_else(|| "generated".to_string());
        let prefix = strategy.naming_hints.prefix.clone().unwrap_or_else(|| "artifact".to_string());
        let extension = strategy.naming_hints.extension.clone().unwrap_or_else(|| "txt".to_string());

        let mut hasher = DefaultHasher::new();
        dir.hash(&mut hasher);
        prefix.hash(&mut hasher);
        extension.hash(&mut hasher);
        content.hash(&mut hasher);
        let digest = hasher.finish();

        PathBuf::from(dir).join(format!("{prefix}_{digest:016x}.{extension}"))
    }
}

/// Marker written into a modified file identifying the logical unit it
/// belongs to. A second `modify` against a file already carrying this
/// marker is a consolidation (the new content is merged in) rather than a
/// plain overwrite — a narrow, documented stand-in for the original's
/// broader content-based consolidation heuristic.
fn unit_marker(target_file: &str) -> String {
    format!("<!-- maf:unit:{target_file} -->")
}

#[async_trait]
impl ArtifactSink for FilesystemArtifactSink {
    async fn place(&self, content: &str, strategy: &PlacementStrategy) -> Result<PlacementResult> {
        match strategy.mode {
            PlacementMode::Create => {
                let relative_path = self.resolve_create_path(content, strategy);
                let absolute_path = self.project_root.join(&relative_path);
                if let Some(parent) = absolute_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&absolute_path, content).await?;
                info!(path = %relative_path.display(), "created artifact");
                Ok(PlacementResult {
                    success: true,
                    path: Some(relative_path.to_string_lossy().into_owned()),
                    action: PlacementAction::Created,
                    error: None,
                })
            }
            PlacementMode::Modify => {
                let target_file = strategy
                    .target_file
                    .clone()
                    .ok_or_else(|| Error::Collaborator("modify strategy requires target_file".to_string()))?;
                let relative_path = PathBuf::from(&target_file);
                let absolute_path = self.project_root.join(&relative_path);
                if let Some(parent) = absolute_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }

                let marker = unit_marker(&target_file);
                let existing = tokio::fs::read_to_string(&absolute_path).await.ok();
                let (action, final_content) = match existing {
                    Some(existing) if existing.contains(&marker) => {
                        (PlacementAction::Consolidated, format!("{existing}\n{content}"))
                    }
                    _ => (PlacementAction::Modified, format!("{marker}\n{content}")),
                };

                tokio::fs::write(&absolute_path, &final_content).await?;
                info!(path = %relative_path.display(), action = ?action, "placed artifact");

                Ok(PlacementResult {
                    success: true,
                    path: Some(relative_path.to_string_lossy().into_owned()),
                    action,
                    error: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_a_new_file_under_target_dir() {
        let dir = tempdir().unwrap();
        let sink = FilesystemArtifactSink::new(dir.path());
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("src/components".to_string()),
            naming_hints: NamingHints {
                prefix: Some("login_form".to_string()),
                extension: Some("tsx".to_string()),
            },
        };

        let result = sink.place("export function LoginForm() {}", &strategy).await.unwrap();
        assert!(result.success);
        assert_eq!(result.action, PlacementAction::Created);
        let path = result.path.unwrap();
        assert!(tokio::fs::try_exists(dir.path().join(&path)).await.unwrap());
    }

    #[tokio::test]
    async fn create_with_identical_content_and_strategy_yields_the_same_path() {
        let dir = tempdir().unwrap();
        let sink = FilesystemArtifactSink::new(dir.path());
        let strategy = PlacementStrategy {
            mode: PlacementMode::Create,
            target_file: None,
            target_dir: Some("src/components".to_string()),
            naming_hints: NamingHints {
                prefix: Some("login_form".to_string()),
                extension: Some("tsx".to_string()),
            },
        };

        let first = sink.place("export function LoginForm() {}", &strategy).await.unwrap();
        let second = sink.place("export function LoginForm() {}", &strategy).await.unwrap();
        assert_eq!(first.path, second.path);

        let third = sink.place("export function SignupForm() {}", &strategy).await.unwrap();
        assert_ne!(first.path, third.path);
    }

    #[tokio::test]
    async fn first_modify_is_modified_second_is_consolidated() {
        let dir = tempdir().unwrap();
        let sink = FilesystemArtifactSink::new(dir.path());
        let strategy = PlacementStrategy {
            mode: PlacementMode::Modify,
            target_file: Some("src/server/handlers.rs".to_string()),
            target_dir: None,
            naming_hints: NamingHints::default(),
        };

        let first = sink.place("fn one() {}", &strategy).await.unwrap();
        assert_eq!(first.action, PlacementAction::Modified);

        let second = sink.place("fn two() {}", &strategy).await.unwrap();
        assert_eq!(second.action, PlacementAction::Consolidated);

        let contents = tokio::fs::read_to_string(dir.path().join("src/server/handlers.rs"))
            .await
            .unwrap();
        assert!(contents.contains("fn one()"));
        assert!(contents.contains("fn two()"));
    }

    #[tokio::test]
    async fn modify_requires_target_file() {
        let dir = tempdir().unwrap();
        let sink = FilesystemArtifactSink::new(dir.path());
        let strategy = PlacementStrategy {
            mode: PlacementMode::Modify,
            target_file: None,
            target_dir: None,
            naming_hints: NamingHints::default(),
        };

        let result = sink.place("content", &strategy).await;
        assert!(result.is_err());
    }
}
