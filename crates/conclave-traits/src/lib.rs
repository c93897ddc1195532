//! Seam traits the engine (`conclave-ai`/`conclave-core`) calls through
//! instead of depending on concrete externals (spec §1 "deliberately out
//! of scope ... specified only at their interfaces"): the LLM provider
//! SDKs and the tools gateway HTTP service. Grounded on
//! `restflow-ai/src/llm/client.rs`'s `LlmClient` trait and message/tool-call
//! shape, generalized to also cover the tools gateway and the event sink
//! dual-write seam (spec §4.3).

use async_trait::async_trait;
use conclave_contracts::{AgentId, SessionId, ToolId};
use conclave_models::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transient LLM error: {0}")]
    Transient(String),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM provider rejected the request: {0}")]
    InvalidRequest(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// An LLM provider client bound to one model profile. Concrete
/// implementations (OpenAI/Anthropic-shaped HTTP clients, or a scripted
/// mock for tests) live in `conclave-ai::llm`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolGatewayError {
    #[error("tool invocation timed out after {0}ms")]
    Timeout(u64),
    #[error("tool gateway returned an error: {0}")]
    GatewayError(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

pub type ToolGatewayResult<T> = Result<T, ToolGatewayError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_id: ToolId,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_id: ToolId,
    pub success: bool,
    pub output: Value,
    pub duration_ms: u64,
}

/// The external tools gateway HTTP service (spec §1, §4.6 step 4 *use_tools*).
#[async_trait]
pub trait ToolsGateway: Send + Sync {
    async fn invoke(&self, invocation: ToolInvocation) -> ToolGatewayResult<ToolOutcome>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventSinkError {
    #[error("event sink I/O error: {0}")]
    Io(String),
}

/// The dual-write seam (spec §4.3): every component that writes to the
/// Event Log also writes the same event to the Progress Store and the SSE
/// Broadcaster. Implemented by `conclave-core::events` and consumed by
/// `conclave-ai`'s worker/orchestrator loops so they need not depend
/// directly on storage.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, session_id: &SessionId, event: Event) -> Result<(), EventSinkError>;
}

/// Convenience used by worker loops when building a tool request list
/// before calling through a `ToolsGateway`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub agent_id: AgentId,
    pub invocation: ToolInvocation,
}

/// The Memory Store seam (C8, spec §4.9) the context pipeline's
/// `memory_retriever` processor calls through. `conclave-core::memory`
/// implements it; `conclave-ai` depends only on this trait so the context
/// pipeline never depends on `conclave-core` (which itself depends on
/// `conclave-ai` for the worker/orchestrator loops it spawns).
#[async_trait]
pub trait MemoryLookup: Send + Sync {
    async fn retrieve(
        &self,
        query: Option<&str>,
        memory_type: Option<&str>,
        tags: &[String],
        limit: usize,
    ) -> Vec<conclave_models::Memory>;

    async fn retrieve_by_similarity(
        &self,
        query_text: &str,
        limit: usize,
        threshold: f32,
    ) -> Vec<conclave_models::Memory>;
}

/// The Artifact Store seam (C9, spec §4.10) the context pipeline's
/// `artifact_resolver` processor calls through.
#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    async fn get(&self, artifact_id: &str, version: Option<u32>) -> Option<Value>;
}

/// Outcome of a single Governance Enforcer decision (spec §4.2): each
/// decision either allows (optionally with a warning) or denies (recording
/// a reason that becomes a `PolicyViolation` event).
#[derive(Debug, Clone, Default)]
pub struct GovernanceDecision {
    pub allowed: bool,
    pub violation_reason: Option<String>,
    pub warning: Option<String>,
}

impl GovernanceDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violation_reason: None,
            warning: None,
        }
    }

    pub fn allow_with_warning(warning: impl Into<String>) -> Self {
        Self {
            allowed: true,
            violation_reason: None,
            warning: Some(warning.into()),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            violation_reason: Some(reason.into()),
            warning: None,
        }
    }
}

/// The per-session Governance Enforcer seam (C2, spec §4.2) the worker
/// (C11) and orchestrator (C12) loops consult before every agent
/// invocation, tool call, iteration, and LLM call. `conclave-core::governance`
/// implements it; constructed once per session and shared as `Arc<dyn
/// GovernanceCheck>` so both loops see the same counters.
#[async_trait]
pub trait GovernanceCheck: Send + Sync {
    async fn check_agent_invocation(&self, from: &AgentId, to: &AgentId) -> GovernanceDecision;
    async fn check_tool_access(&self, agent_id: &AgentId, tool_id: &ToolId) -> GovernanceDecision;
    async fn check_iteration_limit(
        &self,
        agent_id: &AgentId,
        iteration: usize,
        max_iterations: usize,
    ) -> GovernanceDecision;
    async fn record_llm_call(&self) -> GovernanceDecision;
}

/// The Registry seam (C1, spec §4.1) the orchestrator loop consults to
/// discover reachable agents and agents/tools consult for their own
/// definitions. `conclave-core::registry` implements it.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn get_agent(&self, agent_id: &AgentId) -> Option<conclave_models::Agent>;
    async fn get_tool(&self, tool_id: &ToolId) -> Option<conclave_models::Tool>;
    async fn get_model_profile(
        &self,
        model_profile_id: &conclave_contracts::ModelProfileId,
    ) -> Option<conclave_models::ModelProfile>;
    async fn agents_for_orchestrator(&self) -> Vec<conclave_models::Agent>;
    async fn tools_for_agent(&self, agent_id: &AgentId) -> Vec<conclave_models::Tool>;
}

/// The HITL Checkpoint Manager seam (C10, spec §4.8) the orchestrator loop
/// calls at its three hook points. Trigger-condition parsing, persistence,
/// and the timeout sweeper all live in `conclave-core::checkpoint`; the
/// orchestrator only needs to know whether a configured checkpoint fired and,
/// if so, what a human (or the timeout sweeper) eventually resolved it to.
#[async_trait]
pub trait CheckpointGateway: Send + Sync {
    /// Evaluates `config.trigger_condition` against `context_data`. Returns
    /// `None` if the condition did not trigger (no checkpoint created).
    /// Otherwise creates a checkpoint instance and blocks until resolved,
    /// returning the resolution (whether it came from a human or the
    /// timeout sweeper's synthesized `on_timeout` action).
    async fn evaluate_and_await(
        &self,
        session_id: &SessionId,
        workflow_id: &conclave_contracts::WorkflowId,
        config: &conclave_models::CheckpointConfig,
        context_data: Value,
    ) -> Option<conclave_models::CheckpointResolution>;
}
