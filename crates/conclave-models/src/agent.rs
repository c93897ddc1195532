//! Agent registry object (spec §3 "Agent").

use conclave_contracts::{AgentId, ModelProfileId, ToolId};
use serde::{Deserialize, Serialize};

/// Declares how this agent expects its prompt to be assembled (spec §3
/// `context_requirements`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRequirements {
    pub max_context_tokens: usize,
    #[serde(default)]
    pub requires_prior_outputs: Vec<AgentId>,
    /// Optional override of the static 30/50/20 budget split (spec §4.5 step 2).
    #[serde(default)]
    pub budget_allocation: Option<BudgetAllocation>,
    #[serde(default)]
    pub artifact_access_mode: ArtifactAccessMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub original_input_pct: u8,
    pub prior_outputs_pct: u8,
    pub observations_pct: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAccessMode {
    #[default]
    OnDemand,
    Preload,
}

/// Bounds the worker/orchestrator ReAct loop (spec invariant I7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopBounds {
    pub max_iterations: usize,
    pub iteration_timeout_seconds: u64,
}

impl Default for LoopBounds {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_timeout_seconds: 60,
        }
    }
}

/// An agent as held by the Registry (C1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<ToolId>,
    /// Peer agents this agent may invoke. Only meaningful for the
    /// orchestrator agent (spec §3 "list of peer agent ids it may invoke
    /// (orchestrator only)").
    #[serde(default)]
    pub allowed_agents: Vec<AgentId>,
    pub model_profile_id: ModelProfileId,
    #[serde(default)]
    pub loop_bounds: LoopBounds,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: serde_json::Value,
    pub context_requirements: ContextRequirements,
}

impl Agent {
    /// Case-insensitive substring match used by `list_agents(capability?)`
    /// (SPEC_FULL §3 additive detail).
    pub fn has_capability(&self, capability: &str) -> bool {
        let needle = capability.to_lowercase();
        self.capabilities
            .iter()
            .any(|c| c.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Agent {
        Agent {
            agent_id: AgentId::new("fraud_agent"),
            description: "Flags suspicious claims".into(),
            capabilities: vec!["Fraud-Detection".into(), "scoring".into()],
            allowed_tools: vec![ToolId::new("decision_rules")],
            allowed_agents: vec![],
            model_profile_id: ModelProfileId::new("gpt-main"),
            loop_bounds: LoopBounds::default(),
            input_schema: None,
            output_schema: serde_json::json!({"type": "object"}),
            context_requirements: ContextRequirements {
                max_context_tokens: 8000,
                requires_prior_outputs: vec![],
                budget_allocation: None,
                artifact_access_mode: ArtifactAccessMode::OnDemand,
            },
        }
    }

    #[test]
    fn capability_match_is_case_insensitive_substring() {
        let agent = sample();
        assert!(agent.has_capability("fraud"));
        assert!(agent.has_capability("SCORING"));
        assert!(!agent.has_capability("triage"));
    }
}
