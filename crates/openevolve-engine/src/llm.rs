//! The LLM contract (spec §6): a callable `llm_call(prompt) -> text`. The
//! engine does not assume network transport — an echo implementation must
//! work end-to-end, the same shape as the teacher's `EvolutionLlm::complete`
//! trait (`skilllite-evolution::EvolutionLlm`), generalized to the engine's
//! single-string prompt/response shape instead of a message list.

use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Returns a fixed response regardless of prompt. Used by tests and by any
/// caller that wants to drive the engine without a real endpoint (spec §6:
/// "an echo implementation that returns a fixed diff must work end-to-end").
pub struct EchoLlmClient {
    response: String,
}

impl EchoLlmClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_client_ignores_prompt_content() {
        let client = EchoLlmClient::new(r#"{"diffs": []}"#);
        let out = client.complete("anything at all").await.unwrap();
        assert_eq!(out, r#"{"diffs": []}"#);
    }
}
