//! Run lifecycle (spec §6 "Run lifecycle (REST)"): create a run, poll its
//! status, cancel it, or stream its events. All four delegate straight to
//! `WorkflowExecutor`/`EventHub`; no business logic lives here.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use conclave_contracts::{SessionId, WorkflowId};
use conclave_models::SessionStatus;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_run))
        .route("/{session_id}/status", get(run_status))
        .route("/{session_id}/cancel", post(cancel_run))
        .route("/{session_id}/stream", get(stream_run))
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub input_data: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct CreateRunResponse {
    pub session_id: String,
    pub workflow_id: String,
    pub status: &'static str,
    pub stream_url: String,
    pub session_url: String,
}

async fn create_run(State(state): State<AppState>, Json(req): Json<CreateRunRequest>) -> ApiResponse<CreateRunResponse> {
    let workflow_id = WorkflowId::new(req.workflow_id);
    let session_id = req.session_id.map(SessionId::new);

    match state.executor.execute_workflow(&workflow_id, req.input_data, session_id).await {
        Ok(session_id) => ApiResponse::ok(CreateRunResponse {
            stream_url: format!("/runs/{}/stream", session_id.as_str()),
            session_url: format!("/sessions/{}", session_id.as_str()),
            session_id: session_id.as_str().to_string(),
            workflow_id: workflow_id.as_str().to_string(),
            status: "running",
        }),
        Err(e) => e.into(),
    }
}

#[derive(Serialize)]
pub struct RunStatusResponse {
    pub session_id: String,
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

async fn run_status(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResponse<RunStatusResponse> {
    let session_id = SessionId::new(session_id);
    match state.events.get_progress(&session_id).await {
        Some(progress) => ApiResponse::ok(RunStatusResponse {
            session_id: session_id.as_str().to_string(),
            status: status_label(progress.status).to_string(),
            timestamp: progress.updated_at,
        }),
        None => ApiResponse::ok(RunStatusResponse {
            session_id: session_id.as_str().to_string(),
            status: "not_found".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    }
}

/// Spec §6 only enumerates `{running, completed, not_found}` for this
/// endpoint; a finished run is "completed" here regardless of whether the
/// orchestrator's own terminal status was `completed`, `incomplete`,
/// `cancelled`, or `error` — those finer distinctions live in the
/// `workflow_completed`/`workflow_error`/`workflow_cancelled` SSE events
/// and in the session detail view, not this coarse poll.
fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Running => "running",
        SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Error => "completed",
    }
}

#[derive(Serialize)]
pub struct CancelRunResponse {
    pub session_id: String,
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

async fn cancel_run(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResponse<CancelRunResponse> {
    let session_id = SessionId::new(session_id);
    if state.executor.cancel_workflow(&session_id).await {
        ApiResponse::ok(CancelRunResponse {
            session_id: session_id.as_str().to_string(),
            status: "cancelled",
            timestamp: chrono::Utc::now(),
        })
    } else {
        ApiResponse::not_found(format!("no running session '{}'", session_id.as_str()))
    }
}

/// `text/event-stream` honoring `Last-Event-ID` for replay (spec §6).
/// Replayed events and the live tail are chained into one stream; the
/// sentinel `None` the broadcaster sends on completion simply ends it.
async fn stream_run(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = SessionId::new(session_id);
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (replay, receiver) = state.events.subscribe(&session_id, last_event_id.as_deref()).await;

    let replay_stream = stream::iter(replay.into_iter().map(|e| Ok(to_sse_event(e))));
    let live_stream = match receiver {
        Some(rx) => tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(|item| async move {
                match item {
                    Ok(Some(event)) => Some(Ok(to_sse_event(event))),
                    Ok(None) => None,
                    Err(_lagged) => None,
                }
            })
            .boxed(),
        None => stream::empty().boxed(),
    };

    Sse::new(replay_stream.chain(live_stream)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse_event(event: conclave_models::Event) -> SseEvent {
    let event_type = event.event_type();
    let data = serde_json::to_string(&event).unwrap_or_default();
    SseEvent::default().id(event.id.clone()).event(event_type).data(data)
}
