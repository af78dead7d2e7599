//! Text generation for the pipeline.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The pipeline only sees `TextGenerator` (one prompt in, one string out), so
//! the classifier and composer can run against a deterministic stub in tests.

mod rig_adapter;

pub use rig_adapter::RigGenerator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, LlmError};

/// Single-shot text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier for logs.
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".into(),
                message: format!("unknown backend '{other}' (expected anthropic or openai)"),
            }),
        }
    }
}

/// Configuration for creating a text generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl LlmConfig {
    /// Build config from `LLM_BACKEND`, `LLM_MODEL` and the backend's API key variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = std::env::var("LLM_BACKEND")
            .unwrap_or_else(|_| "anthropic".to_string())
            .parse()?;

        let api_key = std::env::var(backend.key_var())
            .map_err(|_| ConfigError::MissingEnvVar(backend.key_var().to_string()))?;

        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| backend.default_model().to_string());

        let timeout_secs: u64 = std::env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Create a text generator from configuration.
///
/// Must be called inside a Tokio runtime: building a rig agent spawns its
/// tool server task.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_generator(config),
        LlmBackend::OpenAi => create_openai_generator(config),
    }
}

fn create_anthropic_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .max_tokens(rig_adapter::MAX_TOKENS)
        .build();
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(
        agent,
        "anthropic",
        &config.model,
        config.timeout,
    )))
}

fn create_openai_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .max_tokens(rig_adapter::MAX_TOKENS)
        .build();
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(
        agent,
        "openai",
        &config.model,
        config.timeout,
    )))
}
