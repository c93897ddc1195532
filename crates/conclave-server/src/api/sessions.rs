//! Sessions (spec §6 "Sessions"): read-only views over the durable event
//! log plus two mutating operations (delete, synchronous compaction
//! trigger). All derivation happens in `conclave-core::events`; handlers
//! here only shape query params into calls and events into JSON.

use axum::extract::{Path, Query, State};
use chrono::Utc;
use conclave_ai::memory::compaction::{CompactionManager, CompactionMethod};
use conclave_contracts::{ArtifactId, SessionId};
use conclave_models::{Event, EventPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::ApiResponse;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{session_id}", get(get_session).delete(delete_session))
        .route("/{session_id}/evidence", get(get_evidence))
        .route("/{session_id}/events/{event_type}", get(get_session_events))
        .route("/{session_id}/trigger-compaction", post(trigger_compaction))
}

#[derive(Serialize)]
struct SessionSummary {
    session_id: String,
    workflow_id: String,
    status: conclave_models::SessionStatus,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    current_agent: Option<String>,
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /sessions` (spec §6 "pagination"). Enumerates every session id
/// with an event log on disk and derives a summary for each; there is no
/// separate session index to page through, so pagination here is a plain
/// slice of the (sorted) id list.
async fn list_sessions(State(state): State<AppState>, Query(page): Query<PageParams>) -> ApiResponse<Vec<SessionSummary>> {
    let mut ids = state.events.list_session_ids().await;
    ids.sort();
    let page_ids: Vec<_> = ids.into_iter().skip(page.offset).take(page.limit).collect();

    let mut summaries = Vec::with_capacity(page_ids.len());
    for session_id in page_ids {
        let session = state.events.read_session(&session_id).await;
        summaries.push(SessionSummary {
            session_id: session.session_id.as_str().to_string(),
            workflow_id: session.workflow_id.as_str().to_string(),
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
            current_agent: session.current_agent.map(|a| a.as_str().to_string()),
        });
    }
    ApiResponse::ok(summaries)
}

#[derive(Deserialize)]
struct EventTypeFilter {
    event_type: Option<String>,
}

/// `GET /sessions/{id}` with an optional `?event_type=` filter (spec §6
/// "full event list, optional `event_type` filter").
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(filter): Query<EventTypeFilter>,
) -> ApiResponse<conclave_models::Session> {
    let mut session = state.events.read_session(&SessionId::new(session_id)).await;
    if let Some(event_type) = &filter.event_type {
        session.events.retain(|e| e.event_type() == event_type);
    }
    ApiResponse::ok(session)
}

/// `GET /sessions/{id}/evidence` — the latest version of the
/// `{session_id}_evidence_map` artifact the Executor persists on
/// completion (spec §4.11 step 4).
async fn get_evidence(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResponse<Value> {
    let artifact_id = ArtifactId::new(format!("{session_id}_evidence_map"));
    match state.artifacts.get(&artifact_id, None).await {
        Ok(Some((content, _version))) => ApiResponse::ok(content),
        Ok(None) => ApiResponse::not_found(format!("no evidence map for session '{session_id}'")),
        Err(e) => ApiResponse::server_error(e.to_string()),
    }
}

/// `GET /sessions/{id}/events/{event_type}`.
async fn get_session_events(
    State(state): State<AppState>,
    Path((session_id, event_type)): Path<(String, String)>,
) -> ApiResponse<Vec<Event>> {
    let session = state.events.read_session(&SessionId::new(session_id)).await;
    let filtered: Vec<Event> = session.events.into_iter().filter(|e| e.event_type() == event_type).collect();
    ApiResponse::ok(filtered)
}

/// `DELETE /sessions/{id}` — removes the session's event log, its context
/// lineage file, its evidence-map artifact (every version), and any
/// compaction archives (spec §6).
async fn delete_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResponse<()> {
    let sid = SessionId::new(session_id.clone());
    let layout = state.events.layout();

    let _ = conclave_storage::atomic::remove_file_if_exists(&layout.session_events_path(sid.as_str())).await;
    let _ = conclave_storage::atomic::remove_file_if_exists(&layout.session_context_lineage_path(sid.as_str())).await;
    let _ = conclave_storage::atomic::remove_dir_all_if_exists(&layout.artifact_dir(&format!("{session_id}_evidence_map")))
        .await;
    let _ = conclave_storage::atomic::remove_files_with_prefix(&layout.compactions_root(), &format!("{session_id}_compaction_")).await;

    state.events.forget_session(&sid).await;
    ApiResponse::message(format!("session '{session_id}' deleted"))
}

#[derive(Deserialize)]
struct CompactionParams {
    #[serde(default = "default_method")]
    method: String,
}

fn default_method() -> String {
    "rule_based".to_string()
}

#[derive(Serialize)]
struct CompactionResponse {
    kept: usize,
    discarded: usize,
    summary: Option<String>,
}

/// `POST /sessions/{id}/trigger-compaction?method={rule_based|llm_based}`
/// — runs the Compaction Manager synchronously over the session's event
/// stream (spec §6, §4.10). Keeps a fixed set of critical event types
/// (terminal/checkpoint/agent-completion events) regardless of volume, and
/// writes the original-plus-compacted archive so the operation stays
/// reversible post-hoc.
async fn trigger_compaction(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<CompactionParams>,
) -> ApiResponse<CompactionResponse> {
    let sid = SessionId::new(session_id.clone());
    let method = match params.method.as_str() {
        "llm_based" => CompactionMethod::LlmBased,
        _ => CompactionMethod::RuleBased,
    };

    let session = state.events.read_session(&sid).await;
    let events_json: Vec<Value> = session.events.iter().filter_map(|e| serde_json::to_value(e).ok()).collect();

    let manager = CompactionManager::new(
        50,
        vec![
            "workflow_started".to_string(),
            "workflow_completed".to_string(),
            "workflow_cancelled".to_string(),
            "workflow_error".to_string(),
            "agent_completed".to_string(),
            "checkpoint_created".to_string(),
            "checkpoint_resolved".to_string(),
            "orchestrator_completed".to_string(),
        ],
    );
    let result = manager.compact(&events_json, method);

    let now = Utc::now();
    let compaction_id = conclave_contracts::new_event_id(now);
    let archive = serde_json::json!({
        "session_id": session_id,
        "method": params.method,
        "original": events_json,
        "compacted": result.kept,
        "discarded_count": result.discarded_count,
        "summary": result.summary,
    });
    let layout = state.events.layout();
    if let Err(e) = conclave_storage::atomic::write_json_atomic(&layout.compaction_archive_path(&session_id, &compaction_id), &archive).await {
        return ApiResponse::server_error(e.to_string());
    }

    let _ = state
        .events
        .record(
            &sid,
            Event::new(
                String::new(),
                sid.clone(),
                now,
                EventPayload::CompactionTriggered {
                    method: params.method.clone(),
                    event_count: session.events.len(),
                },
            ),
        )
        .await;
    let _ = state
        .events
        .record(
            &sid,
            Event::new(
                String::new(),
                sid.clone(),
                Utc::now(),
                EventPayload::CompactionCompleted {
                    kept: result.kept.len(),
                    discarded: result.discarded_count,
                },
            ),
        )
        .await;

    ApiResponse::ok(CompactionResponse {
        kept: result.kept.len(),
        discarded: result.discarded_count,
        summary: result.summary,
    })
}
