//! HITL checkpoint types (spec §3 "CheckpointConfig"/"CheckpointInstance"),
//! grounded on `restflow-core/src/models/checkpoint.rs`'s id/TTL/resolution
//! lifecycle shape.

use chrono::{DateTime, Utc};
use conclave_contracts::{AgentId, CheckpointConfigId, CheckpointInstanceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Approval,
    Decision,
    Input,
    Escalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPoint {
    PreWorkflow,
    AfterAgent,
    BeforeCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConditionType {
    OutputBased,
    InputBased,
    Always,
}

/// A restricted `field_path op literal` expression (§4.8). No general
/// expression engine: parsing happens in `conclave-core::checkpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    #[serde(rename = "type")]
    pub condition_type: TriggerConditionType,
    /// Raw expression text, e.g. `risk_score > 0.8`. Absent for `always`.
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    AutoApprove,
    AutoReject,
    CancelWorkflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timeout_seconds")]
    pub seconds: u64,
    #[serde(default = "default_on_timeout")]
    pub on_timeout: TimeoutAction,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_on_timeout() -> TimeoutAction {
    TimeoutAction::AutoApprove
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seconds: default_timeout_seconds(),
            on_timeout: default_on_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub checkpoint_id: CheckpointConfigId,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub trigger_point: TriggerPoint,
    /// Required iff `trigger_point == after_agent` (invariant I4); enforced
    /// by the Registry's validation path, not by this type.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub trigger_condition: Option<TriggerCondition>,
    pub required_role: String,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub ui_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Resolved,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Approve,
    Reject,
    RequestRevision,
    CancelWorkflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResolution {
    pub action: ResolutionAction,
    pub user_id: String,
    pub user_role: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub data_updates: Option<serde_json::Value>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInstance {
    pub checkpoint_instance_id: CheckpointInstanceId,
    pub checkpoint_id: CheckpointConfigId,
    pub session_id: conclave_contracts::SessionId,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub timeout_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub context_data: serde_json::Value,
    #[serde(default)]
    pub resolution: Option<CheckpointResolution>,
}

impl CheckpointInstance {
    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }
}
