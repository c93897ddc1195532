//! Session object (spec §3 "Session").

use chrono::{DateTime, Utc};
use conclave_contracts::{AgentId, SessionId, WorkflowId};
use serde::{Deserialize, Serialize};

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

/// Owned exclusively by the Executor that created it; never mutated by
/// external writers (spec §3 lifecycle summary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub workflow_id: WorkflowId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub current_agent: Option<AgentId>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Session {
    pub fn new(session_id: SessionId, workflow_id: WorkflowId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            workflow_id,
            created_at: now,
            updated_at: now,
            status: SessionStatus::Running,
            current_agent: None,
            events: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::Cancelled
        )
    }
}
