//! Error types for the engine-side crate. Grounded on `restflow-ai/src/
//! error.rs`'s per-crate `thiserror` enum convention, same as `conclave-ai`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] conclave_storage::StorageError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(#[from] RegistryValidationError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A typed description of which Registry invariant (spec §1 I1-I4) a write
/// violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryValidationError {
    #[error("{kind} id '{id}' already exists")]
    DuplicateId { kind: &'static str, id: String },

    #[error("agent '{agent_id}' references unknown tool '{tool_id}'")]
    UnknownTool { agent_id: String, tool_id: String },

    #[error("agent '{agent_id}' references unknown model profile '{model_profile_id}'")]
    UnknownModelProfile {
        agent_id: String,
        model_profile_id: String,
    },

    #[error("orchestrator references unknown agent '{agent_id}'")]
    UnknownAllowedAgent { agent_id: String },

    #[error("tool '{tool_id}' is still referenced by agent '{agent_id}'")]
    ToolInUse { tool_id: String, agent_id: String },

    #[error("model profile '{model_profile_id}' is still referenced by agent '{agent_id}'")]
    ModelProfileInUse {
        model_profile_id: String,
        agent_id: String,
    },

    #[error("agent '{agent_id}' is still referenced by {referrer}")]
    AgentInUse { agent_id: String, referrer: String },

    #[error("the orchestrator agent cannot be deleted")]
    OrchestratorUndeletable,

    #[error("checkpoint '{checkpoint_id}' has trigger_point=after_agent but no agent_id")]
    AfterAgentCheckpointMissingAgent { checkpoint_id: String },

    #[error("checkpoint '{checkpoint_id}' references unknown agent '{agent_id}'")]
    UnknownCheckpointAgent {
        checkpoint_id: String,
        agent_id: String,
    },
}
