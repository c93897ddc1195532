//! HITL Checkpoint Manager (C10, spec §4.8). Grounded on
//! `restflow-core/src/models/checkpoint.rs`'s pending/resolved lifecycle
//! together with `restflow-ai/src/agent/checkpoint.rs`'s resolution shape
//! (already the basis for `conclave_models::CheckpointInstance`); the
//! in-memory map + secondary session index + background timeout sweeper
//! is this component's own addition, since the teacher has no equivalent
//! of a blocking-orchestrator-wait-for-human-action mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conclave_contracts::{CheckpointInstanceId, SessionId, WorkflowId};
use conclave_models::{
    CheckpointConfig, CheckpointInstance, CheckpointResolution, CheckpointStatus,
    ResolutionAction, TimeoutAction, TriggerCondition, TriggerConditionType,
};
use conclave_storage::StorageLayout;
use conclave_traits::{CheckpointGateway, EventSink};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};

fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        Some(Value::String(text[1..text.len() - 1].to_string()))
    } else {
        text.parse::<f64>().ok().map(|n| serde_json::json!(n))
    }
}

fn compare(op: &str, field: &Value, literal: &Value) -> bool {
    if let (Some(a), Some(b)) = (field.as_f64(), literal.as_f64()) {
        return match op {
            ">" => a > b,
            "<" => a < b,
            ">=" => a >= b,
            "<=" => a <= b,
            "==" => (a - b).abs() < f64::EPSILON,
            _ => false,
        };
    }
    if op == "==" {
        return field.as_str() == literal.as_str();
    }
    false
}

/// Parses and evaluates `field_path op literal`. `None` means the
/// expression could not be parsed or the field was missing (spec §4.8's
/// restricted mini-language; no general evaluator).
fn parse_and_eval(expr: &str, data: &Value) -> Option<bool> {
    for op in ["==", ">=", "<=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let field_path = expr[..idx].trim();
            let literal_text = expr[idx + op.len()..].trim();
            let field_value = resolve_path(data, field_path)?;
            let literal = parse_literal(literal_text)?;
            return Some(compare(op, &field_value, &literal));
        }
    }
    None
}

/// Safe-escalation default (spec §9 Open Question): any parse failure or
/// missing field triggers the checkpoint rather than silently skipping it.
fn evaluate_trigger(condition: &TriggerCondition, data: &Value) -> bool {
    match condition.condition_type {
        TriggerConditionType::Always => true,
        TriggerConditionType::OutputBased | TriggerConditionType::InputBased => {
            match &condition.expression {
                None => true,
                Some(expr) => parse_and_eval(expr, data).unwrap_or(true),
            }
        }
    }
}

/// Per-instance facts drawn from its originating `CheckpointConfig`/
/// `Workflow` at creation time, since `CheckpointInstance` itself only
/// carries the config id (spec §3) and role/workflow filtering needs more.
#[derive(Debug, Clone)]
struct InstanceMeta {
    workflow_id: WorkflowId,
    required_role: String,
    on_timeout: TimeoutAction,
}

pub struct CheckpointManager {
    layout: Arc<StorageLayout>,
    event_sink: Arc<dyn EventSink>,
    instances: Mutex<HashMap<CheckpointInstanceId, CheckpointInstance>>,
    by_session: Mutex<HashMap<SessionId, Vec<CheckpointInstanceId>>>,
    meta: Mutex<HashMap<CheckpointInstanceId, InstanceMeta>>,
}

impl CheckpointManager {
    /// Rehydrates all pending checkpoints from disk (spec §4.8 "On
    /// construction it rehydrates all pending checkpoints from persistent
    /// storage into memory").
    pub async fn new(layout: Arc<StorageLayout>, event_sink: Arc<dyn EventSink>) -> Result<Self> {
        let pending_ids: Vec<CheckpointInstanceId> =
            conclave_storage::atomic::read_jsonl(&layout.checkpoint_pending_index_path()).await?;
        let mut instances = HashMap::new();
        let mut by_session: HashMap<SessionId, Vec<CheckpointInstanceId>> = HashMap::new();
        for id in pending_ids {
            if let Some(instance) =
                conclave_storage::atomic::read_json::<CheckpointInstance>(&layout.checkpoint_path(id.as_str())).await?
            {
                if instance.is_pending() {
                    by_session
                        .entry(instance.session_id.clone())
                        .or_default()
                        .push(id.clone());
                    instances.insert(id, instance);
                }
            }
        }
        Ok(Self {
            layout,
            event_sink,
            instances: Mutex::new(instances),
            by_session: Mutex::new(by_session),
            // Rehydrated instances lose their config-derived metadata
            // (role/on_timeout); they fall back to defaults below until
            // resolved. Only checkpoints created this process keep the
            // full picture.
            meta: Mutex::new(HashMap::new()),
        })
    }

    async fn persist(&self, instance: &CheckpointInstance) -> Result<()> {
        conclave_storage::atomic::write_json_atomic(
            &self.layout.checkpoint_path(instance.checkpoint_instance_id.as_str()),
            instance,
        )
        .await?;
        Ok(())
    }

    async fn persist_pending_index(&self) -> Result<()> {
        let instances = self.instances.lock().await;
        let pending_ids: Vec<&CheckpointInstanceId> = instances
            .values()
            .filter(|i| i.is_pending())
            .map(|i| &i.checkpoint_instance_id)
            .collect();
        conclave_storage::atomic::rewrite_jsonl_atomic(&self.layout.checkpoint_pending_index_path(), &pending_ids).await?;
        Ok(())
    }

    pub async fn create_checkpoint(
        &self,
        session_id: &SessionId,
        workflow_id: &WorkflowId,
        config: &CheckpointConfig,
        context_data: Value,
    ) -> Result<CheckpointInstance> {
        let now = Utc::now();
        let timeout_at = config.timeout.enabled.then(|| now + chrono::Duration::seconds(config.timeout.seconds as i64));
        let instance = CheckpointInstance {
            checkpoint_instance_id: CheckpointInstanceId::new(format!(
                "{}_{}",
                conclave_contracts::new_event_id(now),
                config.checkpoint_id.as_str()
            )),
            checkpoint_id: config.checkpoint_id.clone(),
            session_id: session_id.clone(),
            status: CheckpointStatus::Pending,
            created_at: now,
            timeout_at,
            resolved_at: None,
            context_data,
            resolution: None,
        };
        self.persist(&instance).await?;
        self.instances
            .lock()
            .await
            .insert(instance.checkpoint_instance_id.clone(), instance.clone());
        self.by_session
            .lock()
            .await
            .entry(session_id.clone())
            .or_default()
            .push(instance.checkpoint_instance_id.clone());
        self.meta.lock().await.insert(
            instance.checkpoint_instance_id.clone(),
            InstanceMeta {
                workflow_id: workflow_id.clone(),
                required_role: config.required_role.clone(),
                on_timeout: config.timeout.on_timeout,
            },
        );
        conclave_storage::atomic::append_jsonl_locked(
            &self.layout.checkpoint_session_index_path(session_id.as_str()),
            &instance.checkpoint_instance_id,
        )
        .await?;
        self.persist_pending_index().await?;
        Ok(instance)
    }

    pub async fn resolve_checkpoint(
        &self,
        id: &CheckpointInstanceId,
        resolution: CheckpointResolution,
    ) -> Result<CheckpointInstance> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("checkpoint '{id}'")))?;
        if !instance.is_pending() {
            return Err(CoreError::NotFound(format!("checkpoint '{id}' is not pending")));
        }
        instance.status = CheckpointStatus::Resolved;
        instance.resolved_at = Some(resolution.resolved_at);
        instance.resolution = Some(resolution);
        let snapshot = instance.clone();
        drop(instances);
        self.persist(&snapshot).await?;
        self.persist_pending_index().await?;
        Ok(snapshot)
    }

    pub async fn cancel_checkpoint(&self, id: &CheckpointInstanceId) -> Result<CheckpointInstance> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("checkpoint '{id}'")))?;
        instance.status = CheckpointStatus::Cancelled;
        instance.resolved_at = Some(Utc::now());
        let snapshot = instance.clone();
        drop(instances);
        self.persist(&snapshot).await?;
        self.persist_pending_index().await?;
        Ok(snapshot)
    }

    pub async fn get_checkpoint(&self, id: &CheckpointInstanceId) -> Option<CheckpointInstance> {
        self.instances.lock().await.get(id).cloned()
    }

    /// The role configured on the `CheckpointConfig` this instance was
    /// created from, if still known (see `new`'s rehydration caveat).
    pub async fn required_role(&self, id: &CheckpointInstanceId) -> Option<String> {
        self.meta.lock().await.get(id).map(|m| m.required_role.clone())
    }

    /// Lists pending checkpoints, optionally filtered by `workflow_id` and
    /// by `user_role` (an `admin` caller sees every pending checkpoint;
    /// anyone else only those whose `required_role` matches). Rehydrated
    /// checkpoints that lost their config-derived metadata (see `new`'s
    /// doc comment) are never filtered out by role/workflow, since we have
    /// no basis to exclude them — safe escalation again favors visibility.
    pub async fn get_pending_checkpoints(
        &self,
        user_role: Option<&str>,
        workflow_id: Option<&WorkflowId>,
    ) -> Vec<CheckpointInstance> {
        let instances = self.instances.lock().await;
        let meta = self.meta.lock().await;
        instances
            .values()
            .filter(|i| i.is_pending())
            .filter(|i| match (workflow_id, meta.get(&i.checkpoint_instance_id)) {
                (Some(wf), Some(m)) => &m.workflow_id == wf,
                _ => true,
            })
            .filter(|i| match (user_role, meta.get(&i.checkpoint_instance_id)) {
                (Some(role), Some(m)) => role == "admin" || role == m.required_role,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub async fn get_session_checkpoints(&self, session_id: &SessionId) -> Vec<CheckpointInstance> {
        let by_session = self.by_session.lock().await;
        let instances = self.instances.lock().await;
        by_session
            .get(session_id)
            .map(|ids| ids.iter().filter_map(|id| instances.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    async fn emit(&self, session_id: &SessionId, payload: conclave_models::EventPayload) {
        let event = conclave_models::Event::new(String::new(), session_id.clone(), Utc::now(), payload);
        let _ = self.event_sink.record(session_id, event).await;
    }

    /// Scans pending checkpoints every 30s and synthesizes a timeout
    /// resolution for any whose `timeout_at` has passed (spec §4.8
    /// "Timeout loop").
    pub async fn run_timeout_sweeper(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let now = Utc::now();
            let due: Vec<CheckpointInstanceId> = {
                let instances = self.instances.lock().await;
                instances
                    .values()
                    .filter(|i| i.is_pending())
                    .filter(|i| i.timeout_at.map(|t| now >= t).unwrap_or(false))
                    .map(|i| i.checkpoint_instance_id.clone())
                    .collect()
            };
            for id in due {
                let Some(mut instance) = self.get_checkpoint(&id).await else {
                    continue;
                };
                let on_timeout = self
                    .meta
                    .lock()
                    .await
                    .get(&id)
                    .map(|m| m.on_timeout)
                    .unwrap_or(TimeoutAction::AutoApprove);
                let resolution_action = match on_timeout {
                    TimeoutAction::AutoApprove => ResolutionAction::Approve,
                    TimeoutAction::AutoReject => ResolutionAction::Reject,
                    TimeoutAction::CancelWorkflow => ResolutionAction::CancelWorkflow,
                };
                instance.status = CheckpointStatus::Timeout;
                instance.resolved_at = Some(now);
                instance.resolution = Some(CheckpointResolution {
                    action: resolution_action,
                    user_id: "system".into(),
                    user_role: "system".into(),
                    comments: Some("resolved by timeout sweeper".into()),
                    data_updates: None,
                    resolved_at: now,
                });
                self.instances.lock().await.insert(id.clone(), instance.clone());
                let _ = self.persist(&instance).await;
                let _ = self.persist_pending_index().await;
                self.emit(
                    &instance.session_id,
                    conclave_models::EventPayload::CheckpointTimeout {
                        checkpoint_instance_id: id,
                    },
                )
                .await;
            }
        }
    }
}

#[async_trait]
impl CheckpointGateway for CheckpointManager {
    async fn evaluate_and_await(
        &self,
        session_id: &SessionId,
        workflow_id: &WorkflowId,
        config: &CheckpointConfig,
        context_data: Value,
    ) -> Option<CheckpointResolution> {
        let triggered = match &config.trigger_condition {
            None => true,
            Some(condition) => evaluate_trigger(condition, &context_data),
        };
        if !triggered {
            return None;
        }

        let instance = self.create_checkpoint(session_id, workflow_id, config, context_data).await.ok()?;
        self.emit(
            session_id,
            conclave_models::EventPayload::CheckpointCreated {
                checkpoint_instance_id: instance.checkpoint_instance_id.clone(),
            },
        )
        .await;

        let mut delay = Duration::from_secs(1);
        loop {
            let current = self.get_checkpoint(&instance.checkpoint_instance_id).await?;
            match current.status {
                CheckpointStatus::Pending => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(10));
                }
                CheckpointStatus::Resolved => {
                    let action = current.resolution.as_ref().map(|r| format!("{:?}", r.action)).unwrap_or_default();
                    self.emit(
                        session_id,
                        conclave_models::EventPayload::CheckpointResolved {
                            checkpoint_instance_id: current.checkpoint_instance_id.clone(),
                            action,
                        },
                    )
                    .await;
                    return current.resolution;
                }
                CheckpointStatus::Timeout => return current.resolution,
                CheckpointStatus::Cancelled => return None,
            }
        }
    }
}

pub type SharedCheckpointManager = Arc<CheckpointManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_models::{CheckpointType, TimeoutConfig, TriggerPoint};

    struct NullSink;
    #[async_trait]
    impl EventSink for NullSink {
        async fn record(&self, _session_id: &SessionId, _event: conclave_models::Event) -> std::result::Result<(), conclave_traits::EventSinkError> {
            Ok(())
        }
    }

    fn config(expression: Option<&str>) -> CheckpointConfig {
        CheckpointConfig {
            checkpoint_id: conclave_contracts::CheckpointConfigId::new("cp1"),
            checkpoint_type: CheckpointType::Decision,
            trigger_point: TriggerPoint::AfterAgent,
            agent_id: Some(conclave_contracts::AgentId::new("fraud_agent")),
            trigger_condition: Some(TriggerCondition {
                condition_type: TriggerConditionType::OutputBased,
                expression: expression.map(|s| s.to_string()),
            }),
            required_role: "claims_manager".into(),
            timeout: TimeoutConfig::default(),
            ui_schema: Value::Null,
        }
    }

    #[test]
    fn evaluates_numeric_gt_condition() {
        let cond = TriggerCondition {
            condition_type: TriggerConditionType::OutputBased,
            expression: Some("fraud_score > 0.7".into()),
        };
        assert!(evaluate_trigger(&cond, &serde_json::json!({"fraud_score": 0.85})));
        assert!(!evaluate_trigger(&cond, &serde_json::json!({"fraud_score": 0.5})));
    }

    #[test]
    fn missing_field_defaults_to_trigger() {
        let cond = TriggerCondition {
            condition_type: TriggerConditionType::OutputBased,
            expression: Some("fraud_score > 0.7".into()),
        };
        assert!(evaluate_trigger(&cond, &serde_json::json!({"other": 1})));
    }

    #[tokio::test]
    async fn create_and_resolve_checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let manager = CheckpointManager::new(layout, Arc::new(NullSink)).await.unwrap();
        let session_id = SessionId::new("s1");
        let workflow_id = WorkflowId::new("wf1");
        let cfg = config(Some("fraud_score > 0.7"));

        let resolution = manager
            .evaluate_and_await(&session_id, &workflow_id, &cfg, serde_json::json!({"fraud_score": 0.2}))
            .await;
        assert!(resolution.is_none(), "below threshold should not trigger");
    }

    #[tokio::test]
    async fn get_session_checkpoints_returns_created_instance() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let manager = CheckpointManager::new(layout, Arc::new(NullSink)).await.unwrap();
        let session_id = SessionId::new("s1");
        let workflow_id = WorkflowId::new("wf1");
        let cfg = config(None);
        let instance = manager
            .create_checkpoint(&session_id, &workflow_id, &cfg, Value::Null)
            .await
            .unwrap();

        let found = manager.get_session_checkpoints(&session_id).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].checkpoint_instance_id, instance.checkpoint_instance_id);
    }
}
