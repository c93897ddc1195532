//! Compiled context (spec §3 "Compiled context", produced by §4.4/§4.5).

use conclave_contracts::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse context filter applied by the `content_selector` processor
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Minimal,
    Scoped,
    #[default]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledContext {
    pub agent_id: AgentId,
    #[serde(default)]
    pub original_input: Option<serde_json::Value>,
    #[serde(default)]
    pub prior_outputs: HashMap<AgentId, serde_json::Value>,
    #[serde(default)]
    pub observations: Vec<serde_json::Value>,
    #[serde(default)]
    pub memories: Vec<crate::memory::Memory>,
    #[serde(default)]
    pub artifacts: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub estimated_tokens: usize,
}

impl CompiledContext {
    pub fn empty(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            original_input: None,
            prior_outputs: HashMap::new(),
            observations: Vec::new(),
            memories: Vec::new(),
            artifacts: Vec::new(),
            metadata: serde_json::Value::Null,
            estimated_tokens: 0,
        }
    }
}
