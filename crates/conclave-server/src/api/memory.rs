//! Memory Store (spec §6 "Memory", §4.9): CRUD plus the two retrieval
//! modes (filtered `retrieve`, ranked `retrieve_by_similarity`) and the
//! retention sweep.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use conclave_contracts::MemoryId;
use conclave_models::{Memory, RetrievalMode};
use serde::{Deserialize, Serialize};

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_memories).post(store_memory))
        .route("/{id}", get(get_memory).delete(delete_memory))
        .route("/retrieve", post(retrieve_memory))
        .route("/apply-retention", post(apply_retention))
}

#[derive(Deserialize)]
struct StoreRequest {
    memory_type: String,
    content: String,
    #[serde(default = "serde_json::Value::default")]
    metadata: serde_json::Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    expires_in_days: Option<i64>,
}

/// `GET /memory` is satisfied by `retrieve` with no filters (spec §6
/// gives `/memory` and `/memory/retrieve` as separate surfaces but the
/// underlying operation, and the Memory Store's public API, is one and
/// the same `retrieve`).
async fn list_memories(State(state): State<AppState>) -> ApiResponse<Vec<Memory>> {
    match state.memory.retrieve(None, None, &[], 100, RetrievalMode::Reactive).await {
        Ok(memories) => ApiResponse::ok(memories),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn store_memory(State(state): State<AppState>, Json(req): Json<StoreRequest>) -> ApiResponse<Memory> {
    match state
        .memory
        .store(req.memory_type, req.content, req.metadata, req.tags, req.expires_in_days)
        .await
    {
        Ok(memory) => ApiResponse::created(memory),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn get_memory(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<Memory> {
    match state.memory.get(&MemoryId::new(id.clone())).await {
        Ok(Some(memory)) => ApiResponse::ok(memory),
        Ok(None) => ApiResponse::not_found(format!("memory '{id}' not found")),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

async fn delete_memory(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse<()> {
    match state.memory.delete(&MemoryId::new(id.clone())).await {
        Ok(true) => ApiResponse::message(format!("memory '{id}' deleted")),
        Ok(false) => ApiResponse::not_found(format!("memory '{id}' not found")),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RetrieveRequest {
    Similarity {
        query_text: String,
        #[serde(default = "default_similarity_limit")]
        limit: usize,
        #[serde(default = "default_threshold")]
        threshold: f32,
        #[serde(default)]
        use_embeddings: bool,
    },
    Filtered {
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        memory_type: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        mode: RequestMode,
    },
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum RequestMode {
    #[default]
    Reactive,
    Proactive,
}

fn default_limit() -> usize {
    20
}

fn default_similarity_limit() -> usize {
    10
}

fn default_threshold() -> f32 {
    0.2
}

/// `POST /memory/retrieve` dispatches to whichever of the Memory Store's
/// two retrieval operations the body shape selects: a `query_text` field
/// means ranked similarity search, otherwise the filtered `retrieve` (spec
/// §4.9 names both as the same component's public surface).
async fn retrieve_memory(State(state): State<AppState>, Json(req): Json<RetrieveRequest>) -> ApiResponse<Vec<Memory>> {
    let result = match req {
        RetrieveRequest::Similarity {
            query_text,
            limit,
            threshold,
            use_embeddings,
        } => state.memory.retrieve_by_similarity(&query_text, limit, threshold, use_embeddings).await,
        RetrieveRequest::Filtered {
            query,
            memory_type,
            tags,
            limit,
            mode,
        } => {
            let mode = match mode {
                RequestMode::Reactive => RetrievalMode::Reactive,
                RequestMode::Proactive => RetrievalMode::Proactive,
            };
            state.memory.retrieve(query.as_deref(), memory_type.as_deref(), &tags, limit, mode).await
        }
    };
    match result {
        Ok(memories) => ApiResponse::ok(memories),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

#[derive(Serialize)]
struct RetentionResult {
    removed: usize,
}

async fn apply_retention(State(state): State<AppState>) -> ApiResponse<RetentionResult> {
    match state.memory.apply_retention_policy().await {
        Ok(removed) => ApiResponse::ok(RetentionResult { removed }),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}
