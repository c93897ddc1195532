//! Event Log (C3), Progress Store (C4), SSE Broadcaster (C5) — spec §4.3.
//! Grounded on `restflow-core/src/runtime/background_agent/event_log.rs`
//! for the per-session mutex + append-and-fsync shape, generalized from a
//! single `std::fs::File` handle to the write-temp-then-rename-free JSONL
//! append (`conclave-storage::atomic::append_jsonl_locked` already owns the
//! OS-level exclusive lock; the in-process half is the `Mutex` guarding
//! each session's progress entry here).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conclave_contracts::{AgentId, SessionId, WorkflowId};
use conclave_models::{Event, EventPayload, Session, SessionStatus};
use conclave_storage::StorageLayout;
use conclave_traits::{EventSink, EventSinkError};
use tokio::sync::{broadcast, Mutex, RwLock};

const DEFAULT_MAX_EVENTS_PER_SESSION: usize = 200;
const DEFAULT_SSE_RING_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionProgress {
    pub workflow_id: WorkflowId,
    pub status: SessionStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub events: VecDeque<Event>,
    pub current_agent: Option<AgentId>,
}

impl SessionProgress {
    fn new(workflow_id: WorkflowId, now: chrono::DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
            events: VecDeque::new(),
            current_agent: None,
        }
    }
}

struct SseChannel {
    ring: VecDeque<Event>,
    sender: broadcast::Sender<Option<Event>>,
    completed: bool,
}

impl SseChannel {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_SSE_RING_SIZE);
        Self {
            ring: VecDeque::new(),
            sender,
            completed: false,
        }
    }
}

/// Owns the three C3/C4/C5 pieces behind one set of per-session guards.
/// Constructed once at startup (spec §9 "explicit, not implicit-on-first-use").
pub struct EventHub {
    layout: Arc<StorageLayout>,
    max_events_per_session: usize,
    progress: RwLock<HashMap<SessionId, Mutex<SessionProgress>>>,
    sse: RwLock<HashMap<SessionId, Mutex<SseChannel>>>,
    event_seq: RwLock<HashMap<SessionId, AtomicU64>>,
}

impl EventHub {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            max_events_per_session: DEFAULT_MAX_EVENTS_PER_SESSION,
            progress: RwLock::new(HashMap::new()),
            sse: RwLock::new(HashMap::new()),
            event_seq: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new session's progress/SSE entries (spec §4.11 step 2).
    pub async fn init_session(&self, session_id: &SessionId, workflow_id: WorkflowId) {
        let now = Utc::now();
        self.progress
            .write()
            .await
            .insert(session_id.clone(), Mutex::new(SessionProgress::new(workflow_id, now)));
        self.sse
            .write()
            .await
            .insert(session_id.clone(), Mutex::new(SseChannel::new()));
        self.event_seq.write().await.insert(session_id.clone(), AtomicU64::new(0));
    }

    /// Next id in the per-session append sequence: `{timestamp}_{seq}`, `seq`
    /// zero-padded so lexicographic and append-order comparisons agree (spec
    /// §9 "ids must be monotonically non-decreasing per session"). A plain
    /// clock-seeded random suffix can't make that promise for two events
    /// recorded within the same wall-clock second.
    async fn next_event_id(&self, session_id: &SessionId, timestamp: chrono::DateTime<Utc>) -> String {
        let seq = {
            let guard = self.event_seq.read().await;
            if let Some(counter) = guard.get(session_id) {
                counter.fetch_add(1, Ordering::SeqCst)
            } else {
                drop(guard);
                let mut guard = self.event_seq.write().await;
                let counter = guard.entry(session_id.clone()).or_insert_with(|| AtomicU64::new(0));
                counter.fetch_add(1, Ordering::SeqCst)
            }
        };
        format!("{}_{seq:010}", timestamp.format("%Y%m%d%H%M%S"))
    }

    pub async fn set_status(&self, session_id: &SessionId, status: SessionStatus) {
        if let Some(entry) = self.progress.read().await.get(session_id) {
            let mut progress = entry.lock().await;
            progress.status = status;
            progress.updated_at = Utc::now();
        }
    }

    pub async fn set_current_agent(&self, session_id: &SessionId, agent_id: Option<AgentId>) {
        if let Some(entry) = self.progress.read().await.get(session_id) {
            let mut progress = entry.lock().await;
            progress.current_agent = agent_id;
            progress.updated_at = Utc::now();
        }
    }

    /// The storage layout backing this hub, exposed so callers (e.g. the
    /// server's `DELETE /sessions/{id}` handler) can reach sibling paths
    /// — context lineage, compaction archives — this hub doesn't itself
    /// own an operation for.
    pub fn layout(&self) -> &Arc<StorageLayout> {
        &self.layout
    }

    /// Every session id with an event log on disk, derived from the
    /// `sessions/{id}.jsonl` files themselves rather than a separate index
    /// (spec §6 `GET /sessions`). Excludes the sibling
    /// `{id}_context_lineage.jsonl` files.
    pub async fn list_session_ids(&self) -> Vec<SessionId> {
        conclave_storage::atomic::list_file_stems_with_suffix(&self.layout.sessions_root(), ".jsonl")
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|stem| !stem.ends_with("_context_lineage"))
            .map(SessionId::new)
            .collect()
    }

    pub async fn get_progress(&self, session_id: &SessionId) -> Option<SessionProgress> {
        let guard = self.progress.read().await;
        let entry = guard.get(session_id)?;
        Some(entry.lock().await.clone())
    }

    /// Full session detail derived from the durable event log rather than
    /// the in-memory tail (spec §3 "compiled session detail ... derived
    /// from it").
    pub async fn read_session(&self, session_id: &SessionId) -> Session {
        let events = conclave_storage::atomic::read_jsonl::<Event>(&self.layout.session_events_path(session_id.as_str()))
            .await
            .unwrap_or_default();
        let (workflow_id, status, current_agent) = match self.get_progress(session_id).await {
            Some(p) => (p.workflow_id, p.status, p.current_agent),
            None => (WorkflowId::new(""), SessionStatus::Running, None),
        };
        let created_at = events.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let updated_at = events.last().map(|e| e.timestamp).unwrap_or(created_at);
        Session {
            session_id: session_id.clone(),
            workflow_id,
            created_at,
            updated_at,
            status,
            current_agent,
            events,
        }
    }

    /// Marks the SSE channel completed and broadcasts the sentinel (spec
    /// §4.3 "`complete(session_id)` marks completed and sends the sentinel
    /// to every subscriber").
    pub async fn complete(&self, session_id: &SessionId) {
        if let Some(entry) = self.sse.read().await.get(session_id) {
            let mut channel = entry.lock().await;
            channel.completed = true;
            let _ = channel.sender.send(None);
        }
    }

    /// Subscribes to this session's stream. Replays buffered events whose
    /// id strictly follows `last_event_id` before handing back a live
    /// receiver for subsequent events (spec §4.3 `subscribe`).
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        last_event_id: Option<&str>,
    ) -> (Vec<Event>, Option<broadcast::Receiver<Option<Event>>>) {
        let guard = self.sse.read().await;
        let Some(entry) = guard.get(session_id) else {
            return (Vec::new(), None);
        };
        let channel = entry.lock().await;
        let replay: Vec<Event> = channel
            .ring
            .iter()
            .filter(|e| last_event_id.map(|last| e.id.as_str() > last).unwrap_or(true))
            .cloned()
            .collect();
        if channel.completed {
            (replay, None)
        } else {
            (replay, Some(channel.sender.subscribe()))
        }
    }

    async fn push_sse(&self, session_id: &SessionId, event: Event) {
        if let Some(entry) = self.sse.read().await.get(session_id) {
            let mut channel = entry.lock().await;
            channel.ring.push_back(event.clone());
            if channel.ring.len() > DEFAULT_SSE_RING_SIZE {
                channel.ring.pop_front();
            }
            let _ = channel.sender.send(Some(event));
        }
    }

    /// Drops a session's progress/SSE entries entirely. Used by the
    /// Executor's delayed post-completion cleanup (spec §4.11 step 4
    /// "schedule a delayed progress-store cleanup (~5 min) to allow late
    /// SSE reconnects") — the durable event log on disk is untouched.
    pub async fn forget_session(&self, session_id: &SessionId) {
        self.progress.write().await.remove(session_id);
        self.sse.write().await.remove(session_id);
        self.event_seq.write().await.remove(session_id);
    }

    async fn push_progress(&self, session_id: &SessionId, event: Event) {
        if let Some(entry) = self.progress.read().await.get(session_id) {
            let mut progress = entry.lock().await;
            progress.events.push_back(event);
            progress.updated_at = Utc::now();
            while progress.events.len() > self.max_events_per_session {
                progress.events.pop_front();
            }
        }
    }
}

#[async_trait]
impl EventSink for EventHub {
    /// Dual write (spec §4.3): durable append to the event log, then a
    /// best-effort tail into the Progress Store and a broadcast to SSE
    /// subscribers. Assigns the event's id here so callers never race on
    /// id generation.
    async fn record(&self, session_id: &SessionId, mut event: Event) -> Result<(), EventSinkError> {
        if event.id.is_empty() {
            event.id = self.next_event_id(session_id, event.timestamp).await;
        }
        let path = self.layout.session_events_path(session_id.as_str());
        conclave_storage::atomic::append_jsonl_locked(&path, &event)
            .await
            .map_err(|e| EventSinkError::Io(e.to_string()))?;

        if matches!(
            event.payload,
            EventPayload::AgentInvoked { .. } | EventPayload::AgentCompleted { .. }
        ) {
            let agent = match &event.payload {
                EventPayload::AgentInvoked { agent_id } => Some(agent_id.clone()),
                EventPayload::AgentCompleted { agent_id, .. } => Some(agent_id.clone()),
                _ => None,
            };
            self.set_current_agent(session_id, agent).await;
        }

        self.push_progress(session_id, event.clone()).await;
        self.push_sse(session_id, event).await;
        Ok(())
    }
}

pub type SharedEventHub = Arc<EventHub>;

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_contracts::WorkflowId;

    fn sample_event(id: &str) -> Event {
        Event::new(
            id.to_string(),
            SessionId::new("s1"),
            Utc::now(),
            EventPayload::WorkflowStarted {
                workflow_id: WorkflowId::new("wf1"),
            },
        )
    }

    #[tokio::test]
    async fn record_appends_to_log_and_progress_tail() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let hub = EventHub::new(layout);
        let session_id = SessionId::new("s1");
        hub.init_session(&session_id, WorkflowId::new("wf1")).await;

        hub.record(&session_id, sample_event("")).await.unwrap();
        let progress = hub.get_progress(&session_id).await.unwrap();
        assert_eq!(progress.events.len(), 1);

        let session = hub.read_session(&session_id).await;
        assert_eq!(session.events.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_replays_only_events_after_last_event_id() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let hub = EventHub::new(layout);
        let session_id = SessionId::new("s1");
        hub.init_session(&session_id, WorkflowId::new("wf1")).await;

        hub.record(&session_id, sample_event("20260101000000_00000001")).await.unwrap();
        hub.record(&session_id, sample_event("20260101000001_00000002")).await.unwrap();

        let (replay, _rx) = hub
            .subscribe(&session_id, Some("20260101000000_00000001"))
            .await;
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].id, "20260101000001_00000002");
    }

    #[tokio::test]
    async fn complete_sends_sentinel_and_closes_new_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let hub = EventHub::new(layout);
        let session_id = SessionId::new("s1");
        hub.init_session(&session_id, WorkflowId::new("wf1")).await;
        hub.complete(&session_id).await;

        let (_replay, rx) = hub.subscribe(&session_id, None).await;
        assert!(rx.is_none());
    }
}
