//! `TextGenerator` over a rig-core agent.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;

use crate::error::LlmError;
use crate::llm::TextGenerator;

/// Output budget per call. Classification labels and short replies fit easily.
pub(crate) const MAX_TOKENS: u64 = 1024;

/// Bridges anything rig can prompt (an `Agent`) to `TextGenerator`, adding a
/// per-request timeout.
pub struct RigGenerator<A> {
    agent: A,
    provider: String,
    model_name: String,
    timeout: Duration,
}

impl<A> RigGenerator<A> {
    pub fn new(agent: A, provider: &str, model_name: &str, timeout: Duration) -> Self {
        Self {
            agent,
            provider: provider.to_string(),
            model_name: model_name.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl<A> TextGenerator for RigGenerator<A>
where
    A: Prompt + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.agent.prompt(prompt)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "empty completion".into(),
            }),
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LlmError::Timeout {
                provider: self.provider.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
