//! LLM Client: an opaque text-completion service with retry, rolling
//! statistics and a throttled health probe.
//!
//! Grounded in `original_source/src/llm/ollama_client.py`.

mod ollama;

pub use ollama::{ChatMessage, GenerateOptions, HealthStatus, OllamaClient};

use crate::error::ErrorKind;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("response parse error: {0}")]
    ParseError(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::ModelNotFound(_) => ErrorKind::LlmModelMissing,
            LlmError::Connection(_) | LlmError::Transient(_) => ErrorKind::LlmUnavailable,
            LlmError::ParseError(_) => ErrorKind::ExtractionParseError,
        }
    }

    /// "model not found" and "connection refused" bypass retry; every other
    /// failure is treated as transient and retried.
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
