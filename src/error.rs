//! Error types for the inbox responder.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mailbox provider errors, split by whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailboxError {
    /// Timeouts, dropped connections, SMTP 4xx. Worth retrying.
    #[error("Mailbox {op} failed (transient): {reason}")]
    Transient { op: String, reason: String },

    /// Invalid recipient, rejected auth, SMTP 5xx. Never retried.
    #[error("Mailbox {op} failed (permanent): {reason}")]
    Permanent { op: String, reason: String },
}

impl MailboxError {
    pub fn transient(op: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permanent(op: &str, reason: impl Into<String>) -> Self {
        Self::Permanent {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
        }
    }
}

/// Text generator (LLM provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Whether a transport-level retry may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classify(String),

    #[error("Reply composition failed: {0}")]
    Compose(String),

    #[error("Mailbox fetch failed: {0}")]
    Fetch(#[source] MailboxError),
}
