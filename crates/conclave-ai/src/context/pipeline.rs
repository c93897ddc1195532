//! The Context Processor Pipeline (C6, spec §4.4): an ordered chain of
//! stateless processors, each `process(context, agent_id, session_id) ->
//! {context', success, execution_time_ms, modifications}`. A processor
//! that raises is logged and bypassed; later processors see the
//! pre-processor context. Grounded on `restflow-ai/src/agent/context_manager.rs`'s
//! ordered-transform-chain shape, generalized into separately wired,
//! independently-dispatched processor objects (spec §9 "Dynamic dispatch
//! over 'action types' ... Processor pipeline ... an ordered list of
//! objects satisfying `(context, agent_id, session_id) -> result`").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use conclave_contracts::{AgentId, SessionId};
use conclave_models::{Agent, ContextScope, Event, EventPayload, Memory};
use conclave_traits::{ArtifactLookup, MemoryLookup};
use serde_json::Value;

use super::tokens::{ProcessorExecutionEntry, TokenEstimator};
use crate::memory::compaction::{CompactionManager, CompactionMethod};

/// Working state threaded through the pipeline. Distinct from
/// `conclave_models::CompiledContext`, which is the *output* shape the
/// `injector` processor produces.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub original_input: Option<Value>,
    pub prior_outputs: HashMap<AgentId, Value>,
    pub observations: Vec<Value>,
    pub memories: Vec<Memory>,
    pub artifacts: Vec<Value>,
    pub memory_query: Option<String>,
    pub artifact_requests: Vec<String>,
    pub context_scope: ContextScope,
    pub noise_event_types: Vec<String>,
    pub estimated_tokens: usize,
    pub truncated: bool,
    pub compacted: bool,
    pub cache_key: Option<String>,
    pub compiled: Option<Value>,
}

pub struct ProcessorOutcome {
    pub success: bool,
    pub execution_time_ms: u64,
    pub modifications: Vec<String>,
    pub events: Vec<EventPayload>,
}

impl ProcessorOutcome {
    fn ok(execution_time_ms: u64, modifications: Vec<String>) -> Self {
        Self {
            success: true,
            execution_time_ms,
            modifications,
            events: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ContextProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        agent: &Agent,
        session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String>;
}

/// Runs the standard order (spec §4.4): `content_selector ->
/// compaction_checker -> memory_retriever -> artifact_resolver ->
/// transformer -> token_budget_enforcer -> injector`.
pub struct Pipeline {
    processors: Vec<Arc<dyn ContextProcessor>>,
}

impl Pipeline {
    pub fn standard(
        token_estimator: Arc<dyn TokenEstimator>,
        memory_store: Option<Arc<dyn MemoryLookup>>,
        artifact_store: Option<Arc<dyn ArtifactLookup>>,
        compaction: Arc<CompactionConfig>,
        prefix_cache_enabled: bool,
    ) -> Self {
        let mut processors: Vec<Arc<dyn ContextProcessor>> = vec![Arc::new(ContentSelector)];
        processors.push(Arc::new(CompactionChecker {
            config: compaction,
            token_estimator: Arc::clone(&token_estimator),
        }));
        if let Some(store) = memory_store {
            processors.push(Arc::new(MemoryRetriever { store }));
        }
        if let Some(store) = artifact_store {
            processors.push(Arc::new(ArtifactResolver { store }));
        }
        processors.push(Arc::new(Transformer));
        processors.push(Arc::new(TokenBudgetEnforcer {
            token_estimator: Arc::clone(&token_estimator),
        }));
        processors.push(Arc::new(Injector { prefix_cache_enabled }));
        Self { processors }
    }

    /// Runs every processor in order. A processor error is logged and its
    /// effect discarded (spec §4.4 "bypassed ... subsequent processors see
    /// the pre-processor context"); a full execution-log entry is still
    /// appended to `execution_log` either way.
    pub async fn run(
        &self,
        mut ctx: PipelineContext,
        agent: &Agent,
        session_id: &SessionId,
    ) -> (PipelineContext, Vec<ProcessorExecutionEntry>, Vec<EventPayload>) {
        let mut log = Vec::with_capacity(self.processors.len());
        let mut events = Vec::new();
        for processor in &self.processors {
            let snapshot = ctx.clone();
            let started = Instant::now();
            match processor.process(&mut ctx, agent, session_id).await {
                Ok(outcome) => {
                    log.push(ProcessorExecutionEntry {
                        processor: processor.name().to_string(),
                        success: outcome.success,
                        execution_time_ms: outcome.execution_time_ms,
                        modifications: outcome.modifications,
                    });
                    events.extend(outcome.events);
                }
                Err(reason) => {
                    tracing::warn!(
                        processor = processor.name(),
                        session_id = %session_id,
                        error = %reason,
                        "context processor raised; bypassing"
                    );
                    ctx = snapshot;
                    log.push(ProcessorExecutionEntry {
                        processor: processor.name().to_string(),
                        success: false,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                        modifications: vec![format!("bypassed: {reason}")],
                    });
                }
            }
        }
        (ctx, log, events)
    }
}

// --- content_selector ---------------------------------------------------

struct ContentSelector;

#[async_trait]
impl ContextProcessor for ContentSelector {
    fn name(&self) -> &'static str {
        "content_selector"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        _agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        let before = ctx.observations.len();
        if !ctx.noise_event_types.is_empty() {
            ctx.observations.retain(|obs| {
                obs.get("event_type")
                    .and_then(Value::as_str)
                    .map(|kind| !ctx.noise_event_types.iter().any(|n| n == kind))
                    .unwrap_or(true)
            });
        }
        match ctx.context_scope {
            ContextScope::Full => {}
            ContextScope::Scoped => {
                // keep observations, drop original_input's non-identifying fields handled by handoff;
                // scoped here trims to the most recent half when the set is large.
                if ctx.observations.len() > 40 {
                    let keep_from = ctx.observations.len() - 40;
                    ctx.observations.drain(0..keep_from);
                }
            }
            ContextScope::Minimal => {
                ctx.observations.clear();
            }
        }
        let dropped = before - ctx.observations.len();
        let mut modifications = Vec::new();
        if dropped > 0 {
            modifications.push(format!("dropped {dropped} observations"));
        }
        Ok(ProcessorOutcome::ok(
            started.elapsed().as_millis() as u64,
            modifications,
        ))
    }
}

// --- compaction_checker ---------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub token_threshold: usize,
    pub event_count_threshold: usize,
    pub keep_recent_events: usize,
    pub keep_critical_event_types: Vec<String>,
    pub method: CompactionMethod,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_threshold: 6_000,
            event_count_threshold: 60,
            keep_recent_events: 20,
            keep_critical_event_types: vec!["agent_completed".into(), "policy_violation".into()],
            method: CompactionMethod::RuleBased,
        }
    }
}

struct CompactionChecker {
    config: Arc<CompactionConfig>,
    token_estimator: Arc<dyn TokenEstimator>,
}

#[async_trait]
impl ContextProcessor for CompactionChecker {
    fn name(&self) -> &'static str {
        "compaction_checker"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        _agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        if !self.config.enabled {
            return Ok(ProcessorOutcome::ok(started.elapsed().as_millis() as u64, vec![]));
        }
        let estimated: usize = ctx
            .observations
            .iter()
            .map(|o| self.token_estimator.estimate_value(o))
            .sum();
        let over_tokens = estimated > self.config.token_threshold;
        let over_count = ctx.observations.len() > self.config.event_count_threshold;
        if !over_tokens && !over_count {
            return Ok(ProcessorOutcome::ok(started.elapsed().as_millis() as u64, vec![]));
        }

        let mut events = vec![EventPayload::CompactionTriggered {
            method: format!("{:?}", self.config.method),
            event_count: ctx.observations.len(),
        }];
        let before = ctx.observations.len();
        let manager = CompactionManager::new(
            self.config.keep_recent_events,
            self.config.keep_critical_event_types.clone(),
        );
        let result = manager.compact(&ctx.observations, self.config.method);
        ctx.observations = result.kept;
        ctx.compacted = true;
        events.push(EventPayload::CompactionCompleted {
            kept: ctx.observations.len(),
            discarded: before.saturating_sub(ctx.observations.len()),
        });

        Ok(ProcessorOutcome {
            success: true,
            execution_time_ms: started.elapsed().as_millis() as u64,
            modifications: vec![format!(
                "compacted {before} observations to {}",
                ctx.observations.len()
            )],
            events,
        })
    }
}

// --- memory_retriever ---------------------------------------------------

struct MemoryRetriever {
    store: Arc<dyn MemoryLookup>,
}

#[async_trait]
impl ContextProcessor for MemoryRetriever {
    fn name(&self) -> &'static str {
        "memory_retriever"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        _agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        const MAX_RETRIEVALS: usize = 5;

        let memories = if let Some(query) = ctx.memory_query.clone() {
            // Reactive: the agent explicitly attached a memory_query.
            self.store.retrieve(Some(&query), None, &[], MAX_RETRIEVALS).await
        } else if let Some(input) = &ctx.original_input {
            // Proactive: synthesize a query from original_input.
            let synthesized = synthesize_query(input);
            if synthesized.is_empty() {
                Vec::new()
            } else {
                self.store
                    .retrieve_by_similarity(&synthesized, MAX_RETRIEVALS, 0.15)
                    .await
            }
        } else {
            Vec::new()
        };

        let count = memories.len();
        ctx.memories.extend(memories);
        Ok(ProcessorOutcome::ok(
            started.elapsed().as_millis() as u64,
            if count > 0 {
                vec![format!("attached {count} memories")]
            } else {
                vec![]
            },
        ))
    }
}

fn synthesize_query(input: &Value) -> String {
    match input {
        Value::Object(map) => map
            .values()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect::<Vec<_>>()
            .join(" "),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

// --- artifact_resolver ---------------------------------------------------

struct ArtifactResolver {
    store: Arc<dyn ArtifactLookup>,
}

#[async_trait]
impl ContextProcessor for ArtifactResolver {
    fn name(&self) -> &'static str {
        "artifact_resolver"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        let mut handles = Vec::new();
        if let Some(input) = &ctx.original_input {
            collect_handles(input, &mut handles);
        }
        for output in ctx.prior_outputs.values() {
            collect_handles(output, &mut handles);
        }
        for obs in &ctx.observations {
            collect_handles(obs, &mut handles);
        }
        handles.sort();
        handles.dedup();

        let to_resolve: Vec<String> = match agent.context_requirements.artifact_access_mode {
            conclave_models::ArtifactAccessMode::OnDemand => handles
                .into_iter()
                .filter(|h| ctx.artifact_requests.iter().any(|req| req == h))
                .collect(),
            conclave_models::ArtifactAccessMode::Preload => handles,
        };

        const MAX_LOADS: usize = 10;
        let mut loaded = 0;
        for handle in to_resolve.into_iter().take(MAX_LOADS) {
            if let Some((id, version)) = parse_handle(&handle) {
                if let Some(content) = self.store.get(&id, Some(version)).await {
                    ctx.artifacts.push(serde_json::json!({
                        "handle": handle,
                        "content": content,
                    }));
                    loaded += 1;
                }
            }
        }

        Ok(ProcessorOutcome::ok(
            started.elapsed().as_millis() as u64,
            if loaded > 0 {
                vec![format!("resolved {loaded} artifacts")]
            } else {
                vec![]
            },
        ))
    }
}

fn collect_handles(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for candidate in s.split_whitespace() {
                if candidate.starts_with("artifact://") {
                    out.push(candidate.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != ':').to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_handles(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_handles(v, out)),
        _ => {}
    }
}

fn parse_handle(handle: &str) -> Option<(String, u32)> {
    let rest = handle.strip_prefix("artifact://")?;
    let (id, version_part) = rest.split_once("/v")?;
    let version: u32 = version_part.parse().ok()?;
    Some((id.to_string(), version))
}

// --- transformer ---------------------------------------------------

struct Transformer;

#[async_trait]
impl ContextProcessor for Transformer {
    fn name(&self) -> &'static str {
        "transformer"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        _agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        for obs in ctx.observations.iter_mut() {
            if !obs.is_object() {
                continue;
            }
            let is_tool_result = obs
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t == "tool_result")
                .unwrap_or(false);
            let role = if is_tool_result { "function" } else { "assistant" };
            if let Value::Object(map) = obs {
                map.entry("role").or_insert_with(|| Value::String(role.to_string()));
            }
        }
        Ok(ProcessorOutcome::ok(started.elapsed().as_millis() as u64, vec![]))
    }
}

// --- token_budget_enforcer ---------------------------------------------------

struct TokenBudgetEnforcer {
    token_estimator: Arc<dyn TokenEstimator>,
}

impl TokenBudgetEnforcer {
    fn total_tokens(&self, ctx: &PipelineContext) -> usize {
        let mut total = 0usize;
        if let Some(input) = &ctx.original_input {
            total += self.token_estimator.estimate_value(input);
        }
        for output in ctx.prior_outputs.values() {
            total += self.token_estimator.estimate_value(output);
        }
        for obs in &ctx.observations {
            total += self.token_estimator.estimate_value(obs);
        }
        for memory in &ctx.memories {
            total += self.token_estimator.estimate_str(&memory.content);
        }
        for artifact in &ctx.artifacts {
            total += self.token_estimator.estimate_value(artifact);
        }
        total
    }
}

#[async_trait]
impl ContextProcessor for TokenBudgetEnforcer {
    fn name(&self) -> &'static str {
        "token_budget_enforcer"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        let budget = agent.context_requirements.max_context_tokens;
        let mut dropped = 0usize;
        // Drop oldest observations first until it fits (spec §4.4).
        while self.total_tokens(ctx) > budget && !ctx.observations.is_empty() {
            ctx.observations.remove(0);
            dropped += 1;
        }
        ctx.estimated_tokens = self.total_tokens(ctx);
        if dropped > 0 {
            ctx.truncated = true;
        }
        Ok(ProcessorOutcome::ok(
            started.elapsed().as_millis() as u64,
            if dropped > 0 {
                vec![format!("dropped {dropped} oldest observations to fit budget")]
            } else {
                vec![]
            },
        ))
    }
}

// --- injector ---------------------------------------------------

struct Injector {
    prefix_cache_enabled: bool,
}

#[async_trait]
impl ContextProcessor for Injector {
    fn name(&self) -> &'static str {
        "injector"
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        agent: &Agent,
        _session_id: &SessionId,
    ) -> Result<ProcessorOutcome, String> {
        let started = Instant::now();
        let compiled = serde_json::json!({
            "agent_id": agent.agent_id,
            "original_input": ctx.original_input,
            "prior_outputs": ctx.prior_outputs,
            "observations": ctx.observations,
            "memories": ctx.memories,
            "artifacts": ctx.artifacts,
            "estimated_tokens": ctx.estimated_tokens,
        });

        let mut modifications = vec!["compiled_context emitted".to_string()];
        if self.prefix_cache_enabled {
            let prefix = serde_json::json!({
                "agent_id": agent.agent_id,
                "description": agent.description,
                "output_schema": agent.output_schema,
            })
            .to_string();
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(prefix.as_bytes());
            let digest = hasher.finalize();
            let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
            ctx.cache_key = Some(format!("{}:{}", agent.agent_id, hex));
            modifications.push("prefix cache key attached".to_string());
        }

        ctx.compiled = Some(compiled);
        Ok(ProcessorOutcome::ok(started.elapsed().as_millis() as u64, modifications))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_models::{ArtifactAccessMode, BudgetAllocation, ContextRequirements, LoopBounds};

    fn sample_agent() -> Agent {
        Agent {
            agent_id: AgentId::new("fraud_agent"),
            description: "desc".into(),
            capabilities: vec![],
            allowed_tools: vec![],
            allowed_agents: vec![],
            model_profile_id: conclave_contracts::ModelProfileId::new("gpt"),
            loop_bounds: LoopBounds::default(),
            input_schema: None,
            output_schema: serde_json::json!({}),
            context_requirements: ContextRequirements {
                max_context_tokens: 50,
                requires_prior_outputs: vec![],
                budget_allocation: None::<BudgetAllocation>,
                artifact_access_mode: ArtifactAccessMode::OnDemand,
            },
        }
    }

    #[tokio::test]
    async fn token_budget_enforcer_drops_oldest_first() {
        let agent = sample_agent();
        let mut ctx = PipelineContext::default();
        for i in 0..20 {
            ctx.observations.push(serde_json::json!({"i": i, "pad": "x".repeat(20)}));
        }
        let enforcer = TokenBudgetEnforcer {
            token_estimator: Arc::new(super::super::tokens::HeuristicTokenEstimator),
        };
        let session = SessionId::new("s1");
        enforcer.process(&mut ctx, &agent, &session).await.unwrap();
        assert!(ctx.estimated_tokens <= agent.context_requirements.max_context_tokens);
        assert!(ctx.truncated);
        // oldest (i=0) should be gone, newest retained
        assert!(!ctx.observations.iter().any(|o| o["i"] == 0));
    }

    #[test]
    fn parse_handle_extracts_id_and_version() {
        assert_eq!(
            parse_handle("artifact://evidence_map/v3"),
            Some(("evidence_map".to_string(), 3))
        );
        assert_eq!(parse_handle("not-a-handle"), None);
    }
}
