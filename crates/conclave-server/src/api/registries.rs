//! Registry CRUD (spec §6 "Registries") plus three cross-cutting knobs
//! that live alongside it: the orchestrator agent, the governance policy,
//! and a reload trigger. Thin shims over `conclave_core::Registry` and
//! `WorkflowExecutor`'s governance accessors.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use conclave_contracts::{AgentId, ModelProfileId, ToolId, WorkflowId};
use conclave_core::governance::GovernancePolicy;
use conclave_core::registry::ORCHESTRATOR_AGENT_ID;
use conclave_models::{Agent, ModelProfile, Tool, Workflow};
use serde::Deserialize;

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(put_agent))
        .route("/agents/{id}", get(get_agent).delete(delete_agent))
        .route("/tools", get(list_tools).post(put_tool))
        .route("/tools/{id}", get(get_tool).delete(delete_tool))
        .route("/model-profiles", get(list_model_profiles).post(put_model_profile))
        .route("/model-profiles/{id}", get(get_model_profile).delete(delete_model_profile))
        .route("/workflows", get(list_workflows).post(put_workflow))
        .route("/workflows/{id}", get(get_workflow).delete(delete_workflow))
        .route("/orchestrator", get(get_orchestrator).post(put_orchestrator))
        .route("/governance", get(get_governance).post(put_governance))
        .route("/system-config", get(get_system_config))
        .route("/reload", post(reload))
}

#[derive(Deserialize)]
struct CapabilityFilter {
    capability: Option<String>,
}

async fn list_agents(State(state): State<AppState>, Query(filter): Query<CapabilityFilter>) -> ApiResponse<Vec<Agent>> {
    ApiResponse::ok(state.registry.list_agents(filter.capability.as_deref()).await)
}

async fn get_agent(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<Agent> {
    match state.registry.get_agent(&AgentId::new(id.clone())).await {
        Some(agent) => ApiResponse::ok(agent),
        None => ApiResponse::not_found(format!("agent '{id}' not found")),
    }
}

async fn put_agent(State(state): State<AppState>, Json(agent): Json<Agent>) -> ApiResponse<Agent> {
    match state.registry.put_agent(agent.clone()).await {
        Ok(()) => ApiResponse::created(agent),
        Err(e) => ApiResponse::from(e),
    }
}

async fn delete_agent(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<()> {
    match state.registry.delete_agent(&AgentId::new(id.clone())).await {
        Ok(()) => ApiResponse::message(format!("agent '{id}' deleted")),
        Err(e) => ApiResponse::from(e),
    }
}

#[derive(Deserialize)]
struct TagFilter {
    tag: Option<String>,
}

async fn list_tools(State(state): State<AppState>, Query(filter): Query<TagFilter>) -> ApiResponse<Vec<Tool>> {
    ApiResponse::ok(state.registry.list_tools(filter.tag.as_deref()).await)
}

async fn get_tool(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<Tool> {
    match state.registry.get_tool(&ToolId::new(id.clone())).await {
        Some(tool) => ApiResponse::ok(tool),
        None => ApiResponse::not_found(format!("tool '{id}' not found")),
    }
}

async fn put_tool(State(state): State<AppState>, Json(tool): Json<Tool>) -> ApiResponse<Tool> {
    match state.registry.put_tool(tool.clone()).await {
        Ok(()) => ApiResponse::created(tool),
        Err(e) => ApiResponse::from(e),
    }
}

async fn delete_tool(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<()> {
    match state.registry.delete_tool(&ToolId::new(id.clone())).await {
        Ok(()) => ApiResponse::message(format!("tool '{id}' deleted")),
        Err(e) => ApiResponse::from(e),
    }
}

async fn list_model_profiles(State(state): State<AppState>) -> ApiResponse<Vec<ModelProfile>> {
    ApiResponse::ok(state.registry.list_model_profiles().await)
}

async fn get_model_profile(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<ModelProfile> {
    match state.registry.get_model_profile(&ModelProfileId::new(id.clone())).await {
        Some(profile) => ApiResponse::ok(profile),
        None => ApiResponse::not_found(format!("model profile '{id}' not found")),
    }
}

async fn put_model_profile(State(state): State<AppState>, Json(profile): Json<ModelProfile>) -> ApiResponse<ModelProfile> {
    match state.registry.put_model_profile(profile.clone()).await {
        Ok(()) => ApiResponse::created(profile),
        Err(e) => ApiResponse::from(e),
    }
}

async fn delete_model_profile(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<()> {
    match state.registry.delete_model_profile(&ModelProfileId::new(id.clone())).await {
        Ok(()) => ApiResponse::message(format!("model profile '{id}' deleted")),
        Err(e) => ApiResponse::from(e),
    }
}

async fn list_workflows(State(state): State<AppState>) -> ApiResponse<Vec<Workflow>> {
    ApiResponse::ok(state.registry.list_workflows().await)
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<Workflow> {
    match state.registry.get_workflow(&WorkflowId::new(id.clone())).await {
        Some(workflow) => ApiResponse::ok(workflow),
        None => ApiResponse::not_found(format!("workflow '{id}' not found")),
    }
}

async fn put_workflow(State(state): State<AppState>, Json(workflow): Json<Workflow>) -> ApiResponse<Workflow> {
    match state.registry.put_workflow(workflow.clone()).await {
        Ok(()) => ApiResponse::created(workflow),
        Err(e) => ApiResponse::from(e),
    }
}

async fn delete_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<()> {
    match state.registry.delete_workflow(&WorkflowId::new(id.clone())).await {
        Ok(()) => ApiResponse::message(format!("workflow '{id}' deleted")),
        Err(e) => ApiResponse::from(e),
    }
}

/// `GET /registries/orchestrator` — the well-known agent whose
/// `allowed_agents` defines the orchestrator's dispatch set (spec §4.1,
/// invariant I2/I3).
async fn get_orchestrator(State(state): State<AppState>) -> ApiResponse<Agent> {
    match state.registry.get_agent(&AgentId::new(ORCHESTRATOR_AGENT_ID)).await {
        Some(agent) => ApiResponse::ok(agent),
        None => ApiResponse::not_found("orchestrator agent not configured"),
    }
}

/// `POST /registries/orchestrator` — replaces the orchestrator agent
/// document; `agent_id` in the body is ignored in favor of the
/// well-known id so a caller can't accidentally orphan the convention.
async fn put_orchestrator(State(state): State<AppState>, Json(mut agent): Json<Agent>) -> ApiResponse<Agent> {
    agent.agent_id = AgentId::new(ORCHESTRATOR_AGENT_ID);
    match state.registry.put_agent(agent.clone()).await {
        Ok(()) => ApiResponse::created(agent),
        Err(e) => ApiResponse::from(e),
    }
}

/// `GET /registries/governance` — the live `GovernancePolicy` the
/// Executor hands each new session's Governance Enforcer (spec §4.2).
async fn get_governance(State(state): State<AppState>) -> ApiResponse<GovernancePolicy> {
    ApiResponse::ok(state.executor.governance_policy().await)
}

/// `POST /registries/governance` — replaces the policy applied to
/// sessions started after this call; sessions already running keep the
/// policy snapshot they started with (spec §4.2 "constructed fresh per
/// session").
async fn put_governance(State(state): State<AppState>, Json(policy): Json<GovernancePolicy>) -> ApiResponse<GovernancePolicy> {
    state.executor.set_governance_policy(policy.clone()).await;
    ApiResponse::ok(policy)
}

/// `GET /registries/system-config` — spec §6 lists this endpoint at the
/// interface level without defining a mutable config model; rather than
/// invent one, this surfaces the read-only knobs that already exist
/// elsewhere in the system (storage/registry roots, governance policy)
/// so a caller has one place to see the whole running configuration.
async fn get_system_config(State(state): State<AppState>) -> ApiResponse<serde_json::Value> {
    let governance = state.executor.governance_policy().await;
    ApiResponse::ok(serde_json::json!({
        "storage_root": state.events.layout().root(),
        "governance": governance,
    }))
}

/// `POST /registries/reload` — re-reads all registry YAML documents from
/// disk (spec §4.1 "Hot reload").
async fn reload(State(state): State<AppState>) -> ApiResponse<()> {
    match state.registry.load_all().await {
        Ok(()) => ApiResponse::message("registry reloaded"),
        Err(e) => ApiResponse::from(e),
    }
}
