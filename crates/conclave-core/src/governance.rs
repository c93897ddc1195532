//! Governance Enforcer (C2, spec §4.2): constructed fresh per session,
//! holds per-session counters behind a single mutex. Grounded on the
//! teacher's per-session counter style in `restflow-core/src/runtime/
//! background_agent` (iteration/attempt counters scoped to one run),
//! generalized to the four counter kinds spec §4.2 names plus the
//! HITL role check used by checkpoint resolution.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use conclave_contracts::{AgentId, ToolId};
use conclave_traits::{GovernanceCheck, GovernanceDecision, RegistryLookup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernancePolicy {
    pub max_duplicate_invocations: usize,
    pub max_tool_invocations_per_session: usize,
    pub max_llm_calls_per_session: usize,
    /// `required_role -> roles that may also act as it` (spec §4.2
    /// "HITL role check ... a configured role-hierarchy table").
    pub can_act_as: HashMap<String, Vec<String>>,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            max_duplicate_invocations: 2,
            max_tool_invocations_per_session: 50,
            max_llm_calls_per_session: 200,
            can_act_as: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    agent_invocations: HashMap<AgentId, usize>,
    tool_invocations_total: usize,
    llm_calls_total: usize,
}

pub struct Governance {
    policy: GovernancePolicy,
    registry: Arc<dyn RegistryLookup>,
    counters: Mutex<Counters>,
}

impl Governance {
    pub fn new(policy: GovernancePolicy, registry: Arc<dyn RegistryLookup>) -> Self {
        Self {
            policy,
            registry,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// HITL role check (spec §4.2): exact match, `admin` wildcard, or a
    /// transitive grant through `can_act_as`.
    pub fn role_satisfies(&self, user_role: &str, required_role: &str) -> bool {
        if user_role == required_role || user_role == "admin" {
            return true;
        }
        let mut seen = std::collections::HashSet::new();
        let mut frontier = vec![user_role.to_string()];
        while let Some(role) = frontier.pop() {
            if !seen.insert(role.clone()) {
                continue;
            }
            if let Some(grants) = self.policy.can_act_as.get(&role) {
                for grant in grants {
                    if grant == required_role {
                        return true;
                    }
                    frontier.push(grant.clone());
                }
            }
        }
        false
    }
}

#[async_trait]
impl GovernanceCheck for Governance {
    async fn check_agent_invocation(&self, from: &AgentId, to: &AgentId) -> GovernanceDecision {
        let registry_allows = self
            .registry
            .get_agent(from)
            .await
            .map(|agent| agent.allowed_agents.contains(to))
            .unwrap_or(false);
        if !registry_allows {
            return GovernanceDecision::deny(format!(
                "agent '{from}' is not permitted to invoke '{to}'"
            ));
        }
        let mut counters = self.counters.lock().unwrap();
        let count = counters.agent_invocations.entry(to.clone()).or_insert(0);
        if *count >= self.policy.max_duplicate_invocations {
            return GovernanceDecision::deny(format!(
                "agent '{to}' already invoked {count} times (limit {})",
                self.policy.max_duplicate_invocations
            ));
        }
        *count += 1;
        GovernanceDecision::allow()
    }

    async fn check_tool_access(&self, agent_id: &AgentId, tool_id: &ToolId) -> GovernanceDecision {
        let registry_allows = self
            .registry
            .get_agent(agent_id)
            .await
            .map(|agent| agent.allowed_tools.contains(tool_id))
            .unwrap_or(false);
        if !registry_allows {
            return GovernanceDecision::deny(format!(
                "agent '{agent_id}' is not permitted to use tool '{tool_id}'"
            ));
        }
        let mut counters = self.counters.lock().unwrap();
        if counters.tool_invocations_total >= self.policy.max_tool_invocations_per_session {
            return GovernanceDecision::deny(format!(
                "session tool invocation limit ({}) reached",
                self.policy.max_tool_invocations_per_session
            ));
        }
        counters.tool_invocations_total += 1;
        GovernanceDecision::allow()
    }

    async fn check_iteration_limit(
        &self,
        _agent_id: &AgentId,
        iteration: usize,
        max_iterations: usize,
    ) -> GovernanceDecision {
        if iteration < max_iterations {
            GovernanceDecision::allow()
        } else {
            GovernanceDecision::deny(format!(
                "iteration {iteration} reached the loop bound of {max_iterations}"
            ))
        }
    }

    async fn record_llm_call(&self) -> GovernanceDecision {
        let mut counters = self.counters.lock().unwrap();
        counters.llm_calls_total += 1;
        if counters.llm_calls_total > self.policy.max_llm_calls_per_session {
            GovernanceDecision::deny(format!(
                "session LLM call limit ({}) exceeded",
                self.policy.max_llm_calls_per_session
            ))
        } else {
            GovernanceDecision::allow()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_models::{Agent, ArtifactAccessMode, ContextRequirements, LoopBounds, ModelProfile, Tool};
    use conclave_contracts::ModelProfileId;

    struct FixedRegistry {
        agent: Agent,
    }

    #[async_trait]
    impl RegistryLookup for FixedRegistry {
        async fn get_agent(&self, agent_id: &AgentId) -> Option<Agent> {
            (agent_id == &self.agent.agent_id).then(|| self.agent.clone())
        }
        async fn get_tool(&self, _tool_id: &ToolId) -> Option<Tool> {
            None
        }
        async fn get_model_profile(&self, _id: &ModelProfileId) -> Option<ModelProfile> {
            None
        }
        async fn agents_for_orchestrator(&self) -> Vec<Agent> {
            vec![]
        }
        async fn tools_for_agent(&self, _agent_id: &AgentId) -> Vec<Tool> {
            vec![]
        }
    }

    fn agent_allowing(peer: &str, tool: &str) -> Agent {
        Agent {
            agent_id: AgentId::new("orchestrator"),
            description: "".into(),
            capabilities: vec![],
            allowed_tools: vec![ToolId::new(tool)],
            allowed_agents: vec![AgentId::new(peer)],
            model_profile_id: ModelProfileId::new("gpt-main"),
            loop_bounds: LoopBounds::default(),
            input_schema: None,
            output_schema: serde_json::json!({}),
            context_requirements: ContextRequirements {
                max_context_tokens: 4000,
                requires_prior_outputs: vec![],
                budget_allocation: None,
                artifact_access_mode: ArtifactAccessMode::OnDemand,
            },
        }
    }

    #[tokio::test]
    async fn denies_agent_invocation_beyond_duplicate_limit() {
        let registry = Arc::new(FixedRegistry {
            agent: agent_allowing("worker_a", "decision_rules"),
        });
        let policy = GovernancePolicy {
            max_duplicate_invocations: 1,
            ..GovernancePolicy::default()
        };
        let governance = Governance::new(policy, registry);
        let from = AgentId::new("orchestrator");
        let to = AgentId::new("worker_a");
        assert!(governance.check_agent_invocation(&from, &to).await.allowed);
        assert!(!governance.check_agent_invocation(&from, &to).await.allowed);
    }

    #[tokio::test]
    async fn denies_tool_access_not_in_allowed_tools() {
        let registry = Arc::new(FixedRegistry {
            agent: agent_allowing("worker_a", "decision_rules"),
        });
        let governance = Governance::new(GovernancePolicy::default(), registry);
        let agent = AgentId::new("orchestrator");
        let decision = governance
            .check_tool_access(&agent, &ToolId::new("other_tool"))
            .await;
        assert!(!decision.allowed);
    }

    #[test]
    fn role_check_honors_admin_and_hierarchy() {
        let registry = Arc::new(FixedRegistry {
            agent: agent_allowing("worker_a", "decision_rules"),
        });
        let mut can_act_as = HashMap::new();
        can_act_as.insert("senior_reviewer".to_string(), vec!["reviewer".to_string()]);
        let governance = Governance::new(
            GovernancePolicy {
                can_act_as,
                ..GovernancePolicy::default()
            },
            registry,
        );
        assert!(governance.role_satisfies("admin", "reviewer"));
        assert!(governance.role_satisfies("reviewer", "reviewer"));
        assert!(governance.role_satisfies("senior_reviewer", "reviewer"));
        assert!(!governance.role_satisfies("intern", "reviewer"));
    }
}
