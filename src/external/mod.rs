//! External collaborator boundaries: everything that crosses out of this
//! process (LLM calls, filesystem artifact placement, task decomposition)
//! sits behind a narrow trait here. Grounded on the original `BaseAgent`'s
//! `_generate_response`/`get_integration_strategy`/
//! `integrate_generated_content` methods, which this module splits into
//! three focused collaborators rather than one God-object base class.

pub mod artifact_sink;
pub mod decomposer;
pub mod llm;

pub use artifact_sink::{ArtifactSink, FilesystemArtifactSink, PlacementResult, PlacementStrategy};
pub use decomposer::{LlmTaskDecomposer, TaskDecomposer};
pub use llm::{LlmClient, MockLlmClient, ReqwestLlmClient};
