//! Artifact Store (spec §6 "Artifacts", §4.10): versioned, content-
//! addressed documents forming a parent-pointer forest.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use conclave_contracts::ArtifactId;
use conclave_models::ArtifactVersion;
use serde::Deserialize;
use serde_json::Value;

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all_artifacts))
        .route("/versions", post(save_version))
        .route("/{id}/versions", get(list_versions))
        .route("/{id}/versions/latest", get(get_latest_version))
        .route("/{id}/versions/{version}", get(get_version).delete(delete_version))
        .route("/{id}/lineage/{version}", get(get_lineage))
        .route("/{id}/apply-version-limit", post(apply_version_limit))
}

async fn list_all_artifacts(State(state): State<AppState>) -> ApiResponse<Vec<String>> {
    match state.artifacts.list_all_artifacts().await {
        Ok(ids) => ApiResponse::ok(ids),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

#[derive(Deserialize)]
struct SaveRequest {
    artifact_id: String,
    content: Value,
    #[serde(default)]
    parent_version: Option<u32>,
    #[serde(default = "Value::default")]
    metadata: Value,
    #[serde(default)]
    tags: Vec<String>,
}

/// `POST /artifacts/versions` — the artifact id lives in the body rather
/// than the path since `save` may be creating the artifact's very first
/// version (spec §4.10 `save`).
async fn save_version(State(state): State<AppState>, Json(req): Json<SaveRequest>) -> ApiResponse<ArtifactVersion> {
    let artifact_id = ArtifactId::new(req.artifact_id);
    match state
        .artifacts
        .save(&artifact_id, req.content, req.parent_version, req.metadata, req.tags)
        .await
    {
        Ok(version) => ApiResponse::created(version),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn list_versions(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<Vec<ArtifactVersion>> {
    match state.artifacts.list_versions(&ArtifactId::new(id)).await {
        Ok(versions) => ApiResponse::ok(versions),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

#[derive(serde::Serialize)]
struct ArtifactPayload {
    content: Value,
    version: ArtifactVersion,
}

async fn get_latest_version(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<ArtifactPayload> {
    fetch_version(&state, &id, None).await
}

async fn get_version(State(state): State<AppState>, Path((id, version)): Path<(String, u32)>) -> ApiResponse<ArtifactPayload> {
    fetch_version(&state, &id, Some(version)).await
}

async fn fetch_version(state: &AppState, id: &str, version: Option<u32>) -> ApiResponse<ArtifactPayload> {
    match state.artifacts.get(&ArtifactId::new(id), version).await {
        Ok(Some((content, version))) => ApiResponse::ok(ArtifactPayload { content, version }),
        Ok(None) => ApiResponse::not_found(format!("no such artifact version for '{id}'")),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn delete_version(State(state): State<AppState>, Path((id, version)): Path<(String, u32)>) -> ApiResponse<()> {
    match state.artifacts.delete_version(&ArtifactId::new(id.clone()), version).await {
        Ok(true) => ApiResponse::message(format!("artifact '{id}' version {version} deleted")),
        Ok(false) => ApiResponse::not_found(format!("artifact '{id}' has no version {version}")),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn get_lineage(State(state): State<AppState>, Path((id, version)): Path<(String, u32)>) -> ApiResponse<Vec<ArtifactVersion>> {
    match state.artifacts.get_version_lineage(&ArtifactId::new(id), version).await {
        Ok(lineage) => ApiResponse::ok(lineage),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

#[derive(Deserialize)]
struct VersionLimitParams {
    max_versions: usize,
}

async fn apply_version_limit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<VersionLimitParams>,
) -> ApiResponse<Vec<u32>> {
    match state.artifacts.apply_version_limit(&ArtifactId::new(id), params.max_versions).await {
        Ok(removed) => ApiResponse::ok(removed),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}
