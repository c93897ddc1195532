//! Context Compiler (C7, spec §4.5): drives the pipeline for one
//! compilation, applies handoff scoping first, falls back to a static
//! budget split when the pipeline is disabled, counts tokens, and records
//! compilation lineage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use conclave_contracts::{AgentId, SessionId};
use conclave_models::{Agent, CompiledContext, ContextScope, EventPayload};
use serde_json::Value;

use super::handoff::{self, HandoffMode, HandoffRule};
use super::pipeline::{Pipeline, PipelineContext};
use super::tokens::{ContextLineageRecord, TokenEstimator};

pub struct ContextCompiler {
    pipeline: Option<Pipeline>,
    token_estimator: Arc<dyn TokenEstimator>,
    handoff_rules: Vec<HandoffRule>,
}

impl ContextCompiler {
    pub fn new(
        pipeline: Option<Pipeline>,
        token_estimator: Arc<dyn TokenEstimator>,
        handoff_rules: Vec<HandoffRule>,
    ) -> Self {
        Self {
            pipeline,
            token_estimator,
            handoff_rules,
        }
    }

    pub async fn compile_for_agent(&self, req: CompileForAgentRequest<'_>) -> CompileOutcome {
        let mut events = Vec::new();
        let tokens_before = self.estimate_all(&req.original_input, &req.prior_outputs, &req.observations);

        let (prior_outputs, original_input) = if let Some(from_agent_id) = &req.from_agent_id {
            let rule = handoff::select_rule(
                &self.handoff_rules,
                from_agent_id.as_str(),
                req.agent.agent_id.as_str(),
            );
            let mode = rule.map(|r| r.mode).unwrap_or(HandoffMode::Scoped);
            let (scoped_outputs, scoped_input) =
                handoff::apply_handoff(mode, rule, req.prior_outputs, req.original_input);
            let tokens_after = self.estimate_all(&scoped_input, &scoped_outputs, &req.observations);
            events.push(EventPayload::ContextHandoff {
                agent_id: req.agent.agent_id.clone(),
                tokens_before,
                tokens_after,
            });
            (scoped_outputs, scoped_input)
        } else {
            (req.prior_outputs, req.original_input)
        };

        let pipeline_ctx = PipelineContext {
            original_input: original_input.clone(),
            prior_outputs: prior_outputs.clone(),
            observations: req.observations.clone(),
            memories: Vec::new(),
            artifacts: Vec::new(),
            memory_query: req.memory_query,
            artifact_requests: req.artifact_requests,
            context_scope: ContextScope::Full,
            noise_event_types: req.noise_event_types,
            estimated_tokens: 0,
            truncated: false,
            compacted: false,
            cache_key: None,
            compiled: None,
        };

        let (compiled_context, lineage, processor_events, truncated, compacted) = if let Some(pipeline) = &self.pipeline {
            let (result, log, proc_events) = pipeline.run(pipeline_ctx, req.agent, req.session_id).await;
            let compiled = CompiledContext {
                agent_id: req.agent.agent_id.clone(),
                original_input: result.original_input.clone(),
                prior_outputs: result.prior_outputs.clone(),
                observations: result.observations.clone(),
                memories: result.memories.clone(),
                artifacts: result.artifacts.clone(),
                metadata: serde_json::json!({
                    "processor_execution_log": log,
                    "cache_key": result.cache_key,
                }),
                estimated_tokens: result.estimated_tokens,
            };
            (compiled, log, proc_events, result.truncated, result.compacted)
        } else {
            let compiled = self.static_budget_split(req.agent, original_input, prior_outputs, req.observations);
            (compiled, Vec::new(), Vec::new(), false, false)
        };

        events.extend(processor_events);

        let record = ContextLineageRecord {
            compilation_id: conclave_contracts::new_event_id(Utc::now()),
            agent_id: req.agent.agent_id.as_str().to_string(),
            session_id: req.session_id.as_str().to_string(),
            tokens_before,
            tokens_after: compiled_context.estimated_tokens,
            processor_execution_log: lineage,
            truncated,
            compacted,
            memories_attached: compiled_context.memories.len(),
            artifacts_attached: compiled_context.artifacts.len(),
            budget_utilization: if req.agent.context_requirements.max_context_tokens > 0 {
                compiled_context.estimated_tokens as f64
                    / req.agent.context_requirements.max_context_tokens as f64
            } else {
                0.0
            },
            timestamp: Utc::now(),
        };

        CompileOutcome {
            compiled_context,
            lineage: record,
            events,
        }
    }

    /// Compiles context for the orchestrator (spec §4.7 step 2): original
    /// input, advisory workflow guidance, reachable-agent catalog, prior
    /// outputs, and the orchestrator's own observations. Reuses the same
    /// pipeline/budget machinery as `compile_for_agent` with a synthetic
    /// "orchestrator" agent record supplying the token budget.
    pub async fn compile_for_orchestrator(
        &self,
        req: CompileForOrchestratorRequest<'_>,
    ) -> CompileOutcome {
        let agent_req = CompileForAgentRequest {
            agent: req.orchestrator_agent,
            session_id: req.session_id,
            original_input: req.original_input,
            prior_outputs: req.agent_outputs,
            observations: req.observations,
            from_agent_id: None,
            memory_query: None,
            artifact_requests: Vec::new(),
            noise_event_types: Vec::new(),
        };
        let mut outcome = self.compile_for_agent(agent_req).await;
        if let Value::Object(ref mut map) = outcome.compiled_context.metadata {
            map.insert("workflow_guidance".into(), req.workflow_guidance);
            map.insert("agent_catalog".into(), req.agent_catalog);
        }
        outcome
    }

    fn estimate_all(
        &self,
        original_input: &Option<Value>,
        prior_outputs: &HashMap<AgentId, Value>,
        observations: &[Value],
    ) -> usize {
        let mut total = 0;
        if let Some(input) = original_input {
            total += self.token_estimator.estimate_value(input);
        }
        for output in prior_outputs.values() {
            total += self.token_estimator.estimate_value(output);
        }
        for obs in observations {
            total += self.token_estimator.estimate_value(obs);
        }
        total
    }

    /// Static 30/50/20 budget split used when the pipeline is disabled
    /// (spec §4.5 step 2).
    fn static_budget_split(
        &self,
        agent: &Agent,
        original_input: Option<Value>,
        prior_outputs: HashMap<AgentId, Value>,
        mut observations: Vec<Value>,
    ) -> CompiledContext {
        let allocation = agent.context_requirements.budget_allocation;
        let (input_pct, outputs_pct, obs_pct) = allocation
            .map(|a| (a.original_input_pct, a.prior_outputs_pct, a.observations_pct))
            .unwrap_or((30, 50, 20));
        let budget = agent.context_requirements.max_context_tokens;
        let obs_budget = budget * obs_pct as usize / 100;

        let mut used = 0usize;
        let mut kept = Vec::new();
        for obs in observations.drain(..).rev() {
            let cost = self.token_estimator.estimate_value(&obs);
            if used + cost > obs_budget && !kept.is_empty() {
                break;
            }
            used += cost;
            kept.push(obs);
        }
        kept.reverse();

        let input_budget = budget * input_pct as usize / 100;
        let outputs_budget = budget * outputs_pct as usize / 100;
        let _ = (input_budget, outputs_budget); // documented allocation; inputs/outputs are not truncated field-wise here

        let estimated_tokens = self.estimate_all(&original_input, &prior_outputs, &kept);
        CompiledContext {
            agent_id: agent.agent_id.clone(),
            original_input,
            prior_outputs,
            observations: kept,
            memories: Vec::new(),
            artifacts: Vec::new(),
            metadata: serde_json::json!({"budget_split": "static"}),
            estimated_tokens,
        }
    }
}

pub struct CompileForAgentRequest<'a> {
    pub agent: &'a Agent,
    pub session_id: &'a SessionId,
    pub original_input: Option<Value>,
    pub prior_outputs: HashMap<AgentId, Value>,
    pub observations: Vec<Value>,
    pub from_agent_id: Option<AgentId>,
    pub memory_query: Option<String>,
    pub artifact_requests: Vec<String>,
    pub noise_event_types: Vec<String>,
}

pub struct CompileForOrchestratorRequest<'a> {
    pub orchestrator_agent: &'a Agent,
    pub session_id: &'a SessionId,
    pub original_input: Option<Value>,
    pub agent_outputs: HashMap<AgentId, Value>,
    pub observations: Vec<Value>,
    pub workflow_guidance: Value,
    pub agent_catalog: Value,
}

pub struct CompileOutcome {
    pub compiled_context: CompiledContext,
    pub lineage: ContextLineageRecord,
    pub events: Vec<EventPayload>,
}
