//! Registry (C1, spec §4.1): five kinds of declarative objects, loaded at
//! startup from YAML documents into in-memory maps behind a single
//! reader/writer lock, mutated only through an atomic write-then-reload
//! path. Grounded on `restflow-core`'s registry-style catalog loading,
//! generalized to the five object kinds this platform holds, using
//! `conclave-storage::registry_docs` for the YAML load/save primitives
//! the teacher doesn't need (it persists through `redb`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use conclave_contracts::{AgentId, ModelProfileId, ToolId, WorkflowId};
use conclave_models::{Agent, ModelProfile, Tool, TriggerPoint, Workflow};
use conclave_storage::registry_docs::{load_yaml_list, save_yaml_list};
use conclave_traits::RegistryLookup;
use tokio::sync::RwLock;

use crate::error::{RegistryValidationError, Result};

/// Well-known agent id treated as "the orchestrator" for invariant I2/I3
/// purposes (its `allowed_agents` is the set every workflow may invoke).
/// No field in the spec's object model designates this explicitly, so the
/// Registry adopts the convention every registry document uses: an agent
/// literally named `orchestrator`.
pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    tools: HashMap<ToolId, Tool>,
    model_profiles: HashMap<ModelProfileId, ModelProfile>,
    workflows: HashMap<WorkflowId, Workflow>,
}

impl RegistryState {
    fn empty() -> Self {
        Self {
            agents: HashMap::new(),
            tools: HashMap::new(),
            model_profiles: HashMap::new(),
            workflows: HashMap::new(),
        }
    }
}

pub struct RegistryPaths {
    pub agents: PathBuf,
    pub tools: PathBuf,
    pub model_profiles: PathBuf,
    pub workflows: PathBuf,
}

impl RegistryPaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            agents: root.join("agents.yaml"),
            tools: root.join("tools.yaml"),
            model_profiles: root.join("model_profiles.yaml"),
            workflows: root.join("workflows.yaml"),
        }
    }
}

pub struct Registry {
    paths: RegistryPaths,
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(paths: RegistryPaths) -> Self {
        Self {
            paths,
            state: RwLock::new(RegistryState::empty()),
        }
    }

    /// Re-reads all four backing documents and atomically swaps the
    /// in-memory maps (spec §4.1 "Hot reload").
    pub async fn load_all(&self) -> Result<()> {
        let agents: Vec<Agent> = load_yaml_list(&self.paths.agents).await?;
        let tools: Vec<Tool> = load_yaml_list(&self.paths.tools).await?;
        let model_profiles: Vec<ModelProfile> = load_yaml_list(&self.paths.model_profiles).await?;
        let workflows: Vec<Workflow> = load_yaml_list(&self.paths.workflows).await?;

        let next = RegistryState {
            agents: agents.into_iter().map(|a| (a.agent_id.clone(), a)).collect(),
            tools: tools.into_iter().map(|t| (t.tool_id.clone(), t)).collect(),
            model_profiles: model_profiles
                .into_iter()
                .map(|m| (m.model_profile_id.clone(), m))
                .collect(),
            workflows: workflows
                .into_iter()
                .map(|w| (w.workflow_id.clone(), w))
                .collect(),
        };
        *self.state.write().await = next;
        Ok(())
    }

    pub async fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.state.read().await.agents.get(id).cloned()
    }

    pub async fn get_tool(&self, id: &ToolId) -> Option<Tool> {
        self.state.read().await.tools.get(id).cloned()
    }

    pub async fn get_model_profile(&self, id: &ModelProfileId) -> Option<ModelProfile> {
        self.state.read().await.model_profiles.get(id).cloned()
    }

    pub async fn get_workflow(&self, id: &WorkflowId) -> Option<Workflow> {
        self.state.read().await.workflows.get(id).cloned()
    }

    pub async fn list_agents(&self, capability: Option<&str>) -> Vec<Agent> {
        let state = self.state.read().await;
        state
            .agents
            .values()
            .filter(|a| capability.map(|c| a.has_capability(c)).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn list_tools(&self, tag: Option<&str>) -> Vec<Tool> {
        let state = self.state.read().await;
        state
            .tools
            .values()
            .filter(|t| {
                tag.map(|tag| t.lineage_tags.iter().any(|lt| lt == tag))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub async fn list_model_profiles(&self) -> Vec<ModelProfile> {
        self.state.read().await.model_profiles.values().cloned().collect()
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.state.read().await.workflows.values().cloned().collect()
    }

    /// Intersection of all agents with the orchestrator's `allowed_agents`
    /// (spec §4.1 `get_agents_for_orchestrator`).
    pub async fn get_agents_for_orchestrator(&self) -> Vec<Agent> {
        let state = self.state.read().await;
        let Some(orchestrator) = state.agents.get(&AgentId::new(ORCHESTRATOR_AGENT_ID)) else {
            return Vec::new();
        };
        orchestrator
            .allowed_agents
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    pub async fn get_tools_for_agent(&self, agent_id: &AgentId) -> Vec<Tool> {
        let state = self.state.read().await;
        let Some(agent) = state.agents.get(agent_id) else {
            return Vec::new();
        };
        agent
            .allowed_tools
            .iter()
            .filter_map(|id| state.tools.get(id).cloned())
            .collect()
    }

    pub async fn is_agent_invocation_allowed(&self, from: &AgentId, to: &AgentId) -> bool {
        let state = self.state.read().await;
        state
            .agents
            .get(from)
            .map(|agent| agent.allowed_agents.contains(to))
            .unwrap_or(false)
    }

    pub async fn is_tool_access_allowed(&self, agent_id: &AgentId, tool_id: &ToolId) -> bool {
        let state = self.state.read().await;
        state
            .agents
            .get(agent_id)
            .map(|agent| agent.allowed_tools.contains(tool_id))
            .unwrap_or(false)
    }

    /// Validates and persists a new or updated agent (I2, I3's checkpoint
    /// half is validated by `put_checkpoint_config` callers, not here).
    pub async fn put_agent(&self, agent: Agent) -> Result<()> {
        let mut state = self.state.write().await;
        for tool_id in &agent.allowed_tools {
            if !state.tools.contains_key(tool_id) {
                return Err(RegistryValidationError::UnknownTool {
                    agent_id: agent.agent_id.as_str().to_string(),
                    tool_id: tool_id.as_str().to_string(),
                }
                .into());
            }
        }
        if !state.model_profiles.contains_key(&agent.model_profile_id) {
            return Err(RegistryValidationError::UnknownModelProfile {
                agent_id: agent.agent_id.as_str().to_string(),
                model_profile_id: agent.model_profile_id.as_str().to_string(),
            }
            .into());
        }
        for peer in &agent.allowed_agents {
            if peer != &agent.agent_id && !state.agents.contains_key(peer) {
                return Err(RegistryValidationError::UnknownAllowedAgent {
                    agent_id: peer.as_str().to_string(),
                }
                .into());
            }
        }
        state.agents.insert(agent.agent_id.clone(), agent);
        self.persist_agents(&state).await?;
        Ok(())
    }

    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<()> {
        let mut state = self.state.write().await;
        if agent_id.as_str() == ORCHESTRATOR_AGENT_ID {
            return Err(RegistryValidationError::OrchestratorUndeletable.into());
        }
        if let Some(orchestrator) = state.agents.get(&AgentId::new(ORCHESTRATOR_AGENT_ID)) {
            if orchestrator.allowed_agents.contains(agent_id) {
                return Err(RegistryValidationError::AgentInUse {
                    agent_id: agent_id.as_str().to_string(),
                    referrer: "orchestrator".to_string(),
                }
                .into());
            }
        }
        for workflow in state.workflows.values() {
            let referenced = workflow.required_agents.contains(agent_id)
                || workflow.optional_agents.contains(agent_id)
                || workflow.suggested_sequence.contains(agent_id);
            if referenced {
                return Err(RegistryValidationError::AgentInUse {
                    agent_id: agent_id.as_str().to_string(),
                    referrer: format!("workflow '{}'", workflow.workflow_id),
                }
                .into());
            }
        }
        state.agents.remove(agent_id);
        self.persist_agents(&state).await?;
        Ok(())
    }

    pub async fn put_tool(&self, tool: Tool) -> Result<()> {
        let mut state = self.state.write().await;
        state.tools.insert(tool.tool_id.clone(), tool);
        let tools: Vec<Tool> = state.tools.values().cloned().collect();
        save_yaml_list(&self.paths.tools, &tools).await?;
        Ok(())
    }

    pub async fn delete_tool(&self, tool_id: &ToolId) -> Result<()> {
        let mut state = self.state.write().await;
        for agent in state.agents.values() {
            if agent.allowed_tools.contains(tool_id) {
                return Err(RegistryValidationError::ToolInUse {
                    tool_id: tool_id.as_str().to_string(),
                    agent_id: agent.agent_id.as_str().to_string(),
                }
                .into());
            }
        }
        state.tools.remove(tool_id);
        let tools: Vec<Tool> = state.tools.values().cloned().collect();
        save_yaml_list(&self.paths.tools, &tools).await?;
        Ok(())
    }

    pub async fn put_model_profile(&self, profile: ModelProfile) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .model_profiles
            .insert(profile.model_profile_id.clone(), profile);
        let profiles: Vec<ModelProfile> = state.model_profiles.values().cloned().collect();
        save_yaml_list(&self.paths.model_profiles, &profiles).await?;
        Ok(())
    }

    pub async fn delete_model_profile(&self, id: &ModelProfileId) -> Result<()> {
        let mut state = self.state.write().await;
        for agent in state.agents.values() {
            if &agent.model_profile_id == id {
                return Err(RegistryValidationError::ModelProfileInUse {
                    model_profile_id: id.as_str().to_string(),
                    agent_id: agent.agent_id.as_str().to_string(),
                }
                .into());
            }
        }
        state.model_profiles.remove(id);
        let profiles: Vec<ModelProfile> = state.model_profiles.values().cloned().collect();
        save_yaml_list(&self.paths.model_profiles, &profiles).await?;
        Ok(())
    }

    pub async fn put_workflow(&self, workflow: Workflow) -> Result<()> {
        let state = self.state.read().await;
        for checkpoint in &workflow.checkpoints {
            if checkpoint.trigger_point == TriggerPoint::AfterAgent {
                match &checkpoint.agent_id {
                    None => {
                        return Err(RegistryValidationError::AfterAgentCheckpointMissingAgent {
                            checkpoint_id: checkpoint.checkpoint_id.as_str().to_string(),
                        }
                        .into());
                    }
                    Some(agent_id) if !state.agents.contains_key(agent_id) => {
                        return Err(RegistryValidationError::UnknownCheckpointAgent {
                            checkpoint_id: checkpoint.checkpoint_id.as_str().to_string(),
                            agent_id: agent_id.as_str().to_string(),
                        }
                        .into());
                    }
                    Some(_) => {}
                }
            }
        }
        drop(state);
        let mut state = self.state.write().await;
        state.workflows.insert(workflow.workflow_id.clone(), workflow);
        let workflows: Vec<Workflow> = state.workflows.values().cloned().collect();
        save_yaml_list(&self.paths.workflows, &workflows).await?;
        Ok(())
    }

    pub async fn delete_workflow(&self, id: &WorkflowId) -> Result<()> {
        let mut state = self.state.write().await;
        state.workflows.remove(id);
        let workflows: Vec<Workflow> = state.workflows.values().cloned().collect();
        save_yaml_list(&self.paths.workflows, &workflows).await?;
        Ok(())
    }

    async fn persist_agents(&self, state: &RegistryState) -> Result<()> {
        let agents: Vec<Agent> = state.agents.values().cloned().collect();
        save_yaml_list(&self.paths.agents, &agents).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryLookup for Registry {
    async fn get_agent(&self, agent_id: &AgentId) -> Option<Agent> {
        Registry::get_agent(self, agent_id).await
    }
    async fn get_tool(&self, tool_id: &ToolId) -> Option<Tool> {
        Registry::get_tool(self, tool_id).await
    }
    async fn get_model_profile(&self, model_profile_id: &ModelProfileId) -> Option<ModelProfile> {
        Registry::get_model_profile(self, model_profile_id).await
    }
    async fn agents_for_orchestrator(&self) -> Vec<Agent> {
        self.get_agents_for_orchestrator().await
    }
    async fn tools_for_agent(&self, agent_id: &AgentId) -> Vec<Tool> {
        self.get_tools_for_agent(agent_id).await
    }
}

pub type SharedRegistry = Arc<Registry>;

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_models::{
        ArtifactAccessMode, ContextRequirements, LoopBounds, Provider, RetryPolicy,
    };

    fn sample_profile() -> ModelProfile {
        ModelProfile {
            model_profile_id: ModelProfileId::new("gpt-main"),
            provider: Provider::OpenAi,
            model_name: "gpt-test".into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            json_mode: true,
            timeout_seconds: 30,
            retry_policy: RetryPolicy::default(),
        }
    }

    fn sample_agent(id: &str) -> Agent {
        Agent {
            agent_id: AgentId::new(id),
            description: "test agent".into(),
            capabilities: vec![],
            allowed_tools: vec![],
            allowed_agents: vec![],
            model_profile_id: ModelProfileId::new("gpt-main"),
            loop_bounds: LoopBounds::default(),
            input_schema: None,
            output_schema: serde_json::json!({"type": "object"}),
            context_requirements: ContextRequirements {
                max_context_tokens: 4000,
                requires_prior_outputs: vec![],
                budget_allocation: None,
                artifact_access_mode: ArtifactAccessMode::OnDemand,
            },
        }
    }

    #[tokio::test]
    async fn rejects_agent_with_unknown_model_profile() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(RegistryPaths::from_root(dir.path()));
        registry.load_all().await.unwrap();
        let result = registry.put_agent(sample_agent("a1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accepts_agent_with_known_model_profile_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(RegistryPaths::from_root(dir.path()));
        registry.load_all().await.unwrap();
        registry.put_model_profile(sample_profile()).await.unwrap();
        registry.put_agent(sample_agent("a1")).await.unwrap();

        let reloaded = Registry::new(RegistryPaths::from_root(dir.path()));
        reloaded.load_all().await.unwrap();
        assert!(reloaded.get_agent(&AgentId::new("a1")).await.is_some());
    }

    #[tokio::test]
    async fn orchestrator_agent_is_undeletable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(RegistryPaths::from_root(dir.path()));
        registry.load_all().await.unwrap();
        registry.put_model_profile(sample_profile()).await.unwrap();
        registry
            .put_agent(sample_agent(ORCHESTRATOR_AGENT_ID))
            .await
            .unwrap();
        let result = registry
            .delete_agent(&AgentId::new(ORCHESTRATOR_AGENT_ID))
            .await;
        assert!(result.is_err());
    }
}
