//! Workflow registry object (spec §3 "Workflow"), grounded on
//! `restflow-core/src/models/workflow.rs`'s serde/default-function
//! conventions.

use conclave_contracts::{AgentId, WorkflowId};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// `completion_criteria` is a loose floor; the orchestrator may diverge.
    Advisory,
    /// Violating `required_agents`/`required_outputs` blocks `workflow_complete`.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCriterion {
    RequiredAgentsExecuted,
    MinAgentsExecuted,
    RequiredOutputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    #[serde(default = "default_mode")]
    pub mode: WorkflowMode,
    pub goal: String,
    #[serde(default)]
    pub suggested_sequence: Vec<AgentId>,
    #[serde(default)]
    pub required_agents: Vec<AgentId>,
    #[serde(default)]
    pub optional_agents: Vec<AgentId>,
    #[serde(default)]
    pub completion_criteria: Vec<CompletionCriterion>,
    #[serde(default)]
    pub min_agents_executed: Option<usize>,
    #[serde(default)]
    pub required_outputs: Vec<String>,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointConfig>,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    #[serde(default = "default_max_agent_invocations")]
    pub max_agent_invocations: usize,
}

fn default_mode() -> WorkflowMode {
    WorkflowMode::Advisory
}

fn default_max_duration_seconds() -> u64 {
    3600
}

fn default_max_agent_invocations() -> usize {
    50
}

impl Workflow {
    /// Invariant I7's workflow half: the loop bound paired with each
    /// agent's `max_iterations`.
    pub fn max_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_duration_seconds)
    }
}
