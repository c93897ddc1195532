//! Shared application state (spec §9 "explicit, not implicit-on-first-use"),
//! grounded on `restflow-server/src/api/state.rs`'s `AppState` extractor
//! shape, holding `Arc`s directly rather than a daemon client handle — this
//! gateway is the process that owns the engine's state, not a proxy to one.

use std::sync::Arc;

use conclave_core::{ArtifactStore, CheckpointManager, EventHub, MemoryStore, Registry, WorkflowExecutor};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub events: Arc<EventHub>,
    pub checkpoints: Arc<CheckpointManager>,
    pub memory: Arc<MemoryStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub executor: Arc<WorkflowExecutor>,
}
