//! Grounded on `BaseAgent._generate_response`/`_handle_llm_error`: a test-mode
//! fixed string, and a thin HTTP client for the real provider.

use crate::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

pub const MOCK_RESPONSE: &str = "Mock LLM response for testing";

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns generated text, or `Ok(None)` on a provider failure that
    /// should be treated as "no output" rather than fatal (the caller
    /// decides whether that becomes a `TaskFailed`).
    async fn generate(&self, prompt: &str, max_tokens: Option<u32>) -> Result<Option<String>>;
}

/// Used whenever `Config::test_mode` is set, so tests and local runs never
/// require a real provider credential.
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, _prompt: &str, _max_tokens: Option<u32>) -> Result<Option<String>> {
        Ok(Some(MOCK_RESPONSE.to_string()))
    }
}

/// Talks to an Anthropic-compatible messages endpoint. Kept intentionally
/// narrow: one request shape in, one string out, errors mapped to
/// `Error::Collaborator` rather than leaking `reqwest`'s error type.
pub struct ReqwestLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ReqwestLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for ReqwestLlmClient {
    async fn generate(&self, prompt: &str, max_tokens: Option<u32>) -> Result<Option<String>> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens.unwrap_or(1024),
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "llm request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "llm provider returned an error status");
            return Ok(None);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("malformed llm response: {e}")))?;

        let text = payload
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .map(strip_code_fences)
            .map(str::to_string);

        debug!(has_text = text.is_some(), "llm generation complete");
        Ok(text)
    }
}

/// The core does not interpret generated text beyond stripping code-fence
/// markers, per the LLMClient contract.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```")
        .map(|rest| rest.trim_start_matches(|c: char| c.is_alphabetic()))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_returns_fixed_string() {
        let client = MockLlmClient;
        let result = client.generate("anything", None).await.unwrap();
        assert_eq!(result.as_deref(), Some(MOCK_RESPONSE));
    }

    #[test]
    fn strips_fenced_code_block() {
        let fenced = "```rust\nfn main() {}\n```";
        assert_eq!(strip_code_fences(fenced), "fn main() {}");
    }

    #[test]
    fn leaves_unfenced_text_untouched() {
        assert_eq!(strip_code_fences("plain text"), "plain text");
    }
}
