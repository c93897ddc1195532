//! HITL checkpoints (spec §6 "Checkpoints"): listing, resolution, and
//! cancellation over `conclave_core::CheckpointManager`. Role enforcement
//! here mirrors `CheckpointManager::get_pending_checkpoints`'s own
//! admin-wildcard-or-exact-match rule rather than the full transitive
//! `can_act_as` grant (that richer check lives in the Governance Enforcer,
//! constructed per-session and not reachable from this transport layer).

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use conclave_contracts::{CheckpointInstanceId, SessionId, WorkflowId};
use conclave_models::{CheckpointInstance, CheckpointResolution, ResolutionAction};
use serde::Deserialize;
use serde_json::Value;

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(list_pending))
        .route("/{id}", get(get_checkpoint))
        .route("/{id}/resolve", post(resolve_checkpoint))
        .route("/{id}/cancel", post(cancel_checkpoint))
        .route("/session/{session_id}", get(session_checkpoints))
}

#[derive(Deserialize)]
struct PendingParams {
    user_role: Option<String>,
    workflow_id: Option<String>,
}

async fn list_pending(State(state): State<AppState>, Query(params): Query<PendingParams>) -> ApiResponse<Vec<CheckpointInstance>> {
    let workflow_id = params.workflow_id.map(WorkflowId::new);
    let instances = state
        .checkpoints
        .get_pending_checkpoints(params.user_role.as_deref(), workflow_id.as_ref())
        .await;
    ApiResponse::ok(instances)
}

async fn get_checkpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<CheckpointInstance> {
    match state.checkpoints.get_checkpoint(&CheckpointInstanceId::new(id.clone())).await {
        Some(instance) => ApiResponse::ok(instance),
        None => ApiResponse::not_found(format!("checkpoint '{id}' not found")),
    }
}

/// Request body shape (spec §6): identical to `CheckpointResolution`
/// minus `resolved_at`, which this handler stamps server-side rather
/// than trusting a client-supplied timestamp.
#[derive(Deserialize)]
struct ResolveRequest {
    action: ResolutionAction,
    user_id: String,
    user_role: String,
    #[serde(default)]
    comments: Option<String>,
    #[serde(default)]
    data_updates: Option<Value>,
}

/// `POST /checkpoints/{id}/resolve` — 403 if the resolving user's role
/// doesn't satisfy the checkpoint's `required_role` (spec §6 "403 if role
/// mismatch"); `admin` always satisfies, matching
/// `CheckpointManager::get_pending_checkpoints`'s own rule.
async fn resolve_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResponse<CheckpointInstance> {
    let instance_id = CheckpointInstanceId::new(id.clone());
    if let Some(required_role) = state.checkpoints.required_role(&instance_id).await {
        if req.user_role != "admin" && req.user_role != required_role {
            return ApiResponse::forbidden(format!(
                "role '{}' cannot resolve a checkpoint requiring '{required_role}'",
                req.user_role
            ));
        }
    }
    let resolution = CheckpointResolution {
        action: req.action,
        user_id: req.user_id,
        user_role: req.user_role,
        comments: req.comments,
        data_updates: req.data_updates,
        resolved_at: Utc::now(),
    };
    match state.checkpoints.resolve_checkpoint(&instance_id, resolution).await {
        Ok(instance) => ApiResponse::ok(instance),
        Err(e) => ApiResponse::from(e),
    }
}

#[derive(Deserialize)]
struct CancelParams {
    #[serde(default)]
    user_role: Option<String>,
}

/// `POST /checkpoints/{id}/cancel?user_role=admin` — admin-only (spec §6).
async fn cancel_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CancelParams>,
) -> ApiResponse<CheckpointInstance> {
    if params.user_role.as_deref() != Some("admin") {
        return ApiResponse::forbidden("only 'admin' may cancel a checkpoint");
    }
    match state.checkpoints.cancel_checkpoint(&CheckpointInstanceId::new(id)).await {
        Ok(instance) => ApiResponse::ok(instance),
        Err(e) => ApiResponse::from(e),
    }
}

async fn session_checkpoints(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResponse<Vec<CheckpointInstance>> {
    ApiResponse::ok(state.checkpoints.get_session_checkpoints(&SessionId::new(session_id)).await)
}
