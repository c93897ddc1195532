//! Event envelope and payload catalog (spec §3 "Event"), grounded on
//! `restflow-core`'s `AgentEvent` tagged-enum shape
//! (`runtime/background_agent/event_log.rs`), generalized to a shared
//! envelope since every event here (spec §4.3) carries a common
//! `session_id`/`timestamp`/monotonic `id` regardless of kind.

use chrono::{DateTime, Utc};
use conclave_contracts::{AgentId, CheckpointInstanceId, SessionId};
use serde::{Deserialize, Serialize};

/// Every observable state change in the system (spec §4.3, §4.6, §4.7, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    WorkflowStarted {
        workflow_id: conclave_contracts::WorkflowId,
    },
    WorkflowCompleted {
        status: String,
        evidence_map: Option<serde_json::Value>,
    },
    WorkflowCancelled {
        reason: Option<String>,
    },
    WorkflowError {
        error: String,
    },
    OrchestratorIterationStarted {
        iteration: usize,
    },
    AgentInvoked {
        agent_id: AgentId,
    },
    AgentCompleted {
        agent_id: AgentId,
        status: String,
    },
    OrchestratorCompleted {
        evidence_map: serde_json::Value,
    },
    LlmResponseParseError {
        agent_id: AgentId,
        raw_response: String,
    },
    ValidationFailureLimitExceeded {
        agent_id: AgentId,
        attempts: u32,
    },
    PolicyViolation {
        violation_type: String,
        subject_agent: AgentId,
        target: String,
        reason: String,
    },
    ContextHandoff {
        agent_id: AgentId,
        tokens_before: usize,
        tokens_after: usize,
    },
    CompactionTriggered {
        method: String,
        event_count: usize,
    },
    CompactionCompleted {
        kept: usize,
        discarded: usize,
    },
    CheckpointCreated {
        checkpoint_instance_id: CheckpointInstanceId,
    },
    CheckpointResolved {
        checkpoint_instance_id: CheckpointInstanceId,
        action: String,
    },
    CheckpointTimeout {
        checkpoint_instance_id: CheckpointInstanceId,
    },
    ToolInvoked {
        agent_id: AgentId,
        tool_id: conclave_contracts::ToolId,
    },
    ToolResult {
        agent_id: AgentId,
        tool_id: conclave_contracts::ToolId,
        success: bool,
    },
    /// Escape hatch for event kinds not worth a dedicated variant (keeps
    /// the enum from growing unboundedly as the corpus of event types
    /// grows); carries its own `event_type` name plus a free-form body.
    Custom {
        name: String,
        body: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: String, session_id: SessionId, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            id,
            session_id,
            timestamp,
            payload,
        }
    }

    /// The event kind name used for filtering (`GET /sessions/{id}/events/{event_type}`).
    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            EventPayload::WorkflowStarted { .. } => "workflow_started",
            EventPayload::WorkflowCompleted { .. } => "workflow_completed",
            EventPayload::WorkflowCancelled { .. } => "workflow_cancelled",
            EventPayload::WorkflowError { .. } => "workflow_error",
            EventPayload::OrchestratorIterationStarted { .. } => "orchestrator_iteration_started",
            EventPayload::AgentInvoked { .. } => "agent_invoked",
            EventPayload::AgentCompleted { .. } => "agent_completed",
            EventPayload::OrchestratorCompleted { .. } => "orchestrator_completed",
            EventPayload::LlmResponseParseError { .. } => "llm_response_parse_error",
            EventPayload::ValidationFailureLimitExceeded { .. } => "validation_failure_limit_exceeded",
            EventPayload::PolicyViolation { .. } => "policy_violation",
            EventPayload::ContextHandoff { .. } => "context_handoff",
            EventPayload::CompactionTriggered { .. } => "compaction_triggered",
            EventPayload::CompactionCompleted { .. } => "compaction_completed",
            EventPayload::CheckpointCreated { .. } => "checkpoint_created",
            EventPayload::CheckpointResolved { .. } => "checkpoint_resolved",
            EventPayload::CheckpointTimeout { .. } => "checkpoint_timeout",
            EventPayload::ToolInvoked { .. } => "tool_invoked",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::Custom { .. } => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_flattens_payload_tag_at_top_level() {
        let event = Event::new(
            "20260101000000_deadbeef".into(),
            SessionId::new("s1"),
            Utc::now(),
            EventPayload::WorkflowStarted {
                workflow_id: conclave_contracts::WorkflowId::new("wf1"),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "workflow_started");
        assert_eq!(json["session_id"], "s1");
    }
}
