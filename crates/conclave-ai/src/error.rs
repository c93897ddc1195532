//! Error types for the AI engine (worker/orchestrator loops, context
//! pipeline, LLM clients). Grounded on `restflow-ai/src/error.rs`'s
//! per-crate `thiserror` enum convention; variants map onto spec §7's
//! error-kind table.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM request to {provider}/{model} timed out after {timeout_secs}s")]
    LlmTimeout {
        provider: String,
        model: String,
        timeout_secs: u64,
    },

    #[error("tool error: {0}")]
    Tool(String),

    #[error("max iterations reached: {0}")]
    MaxIterations(usize),

    #[error("invalid response format: {0}")]
    InvalidFormat(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifies which `AiError`s are worth a retry (spec §7 `LLMTransientError`
/// vs `LLMHardError`).
impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::LlmTimeout { .. } | AiError::Http(_))
            || matches!(self, AiError::Llm(msg) if msg.contains("timeout") || msg.contains("rate limit") || msg.contains("5"))
    }
}

pub type Result<T> = std::result::Result<T, AiError>;
