//! Event-stream compaction (C10 "Compaction Manager", spec §4.10), applied
//! to the per-invocation observation/event list rather than chat messages.
//! Grounded on `restflow-ai/src/memory/compaction.rs`'s `ContextCompactor`
//! categorize → summarize → rebuild shape, retargeted at `serde_json::Value`
//! events per SPEC_FULL §4.10.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionMethod {
    /// Keep the most recent N events plus any older event whose type is
    /// critical; summarize the discarded count.
    RuleBased,
    /// Keep critical events, replace non-critical spans with one synthetic
    /// `compaction_summary` event narrating counts per event type.
    LlmBased,
}

pub struct CompactionResult {
    pub kept: Vec<Value>,
    pub discarded_count: usize,
    pub summary: Option<String>,
}

pub struct CompactionManager {
    keep_recent_events: usize,
    keep_critical_event_types: Vec<String>,
}

impl CompactionManager {
    pub fn new(keep_recent_events: usize, keep_critical_event_types: Vec<String>) -> Self {
        Self {
            keep_recent_events,
            keep_critical_event_types,
        }
    }

    fn is_critical(&self, event: &Value) -> bool {
        event
            .get("event_type")
            .and_then(Value::as_str)
            .map(|kind| self.keep_critical_event_types.iter().any(|c| c == kind))
            .unwrap_or(false)
    }

    pub fn compact(&self, events: &[Value], method: CompactionMethod) -> CompactionResult {
        match method {
            CompactionMethod::RuleBased => self.compact_rule_based(events),
            CompactionMethod::LlmBased => self.compact_llm_based(events),
        }
    }

    fn compact_rule_based(&self, events: &[Value]) -> CompactionResult {
        let recent_from = events.len().saturating_sub(self.keep_recent_events);
        let mut kept = Vec::new();
        for (idx, event) in events.iter().enumerate() {
            if idx >= recent_from || self.is_critical(event) {
                kept.push(event.clone());
            }
        }
        let discarded = events.len().saturating_sub(kept.len());
        CompactionResult {
            kept,
            discarded_count: discarded,
            summary: None,
        }
    }

    fn compact_llm_based(&self, events: &[Value]) -> CompactionResult {
        let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        let mut kept = Vec::new();
        let mut discarded = 0usize;

        for event in events {
            if self.is_critical(event) {
                kept.push(event.clone());
            } else {
                let kind = event
                    .get("event_type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *counts.entry(kind).or_insert(0) += 1;
                discarded += 1;
            }
        }

        if discarded > 0 {
            let narrative = counts
                .iter()
                .map(|(kind, count)| format!("{count} {kind}"))
                .collect::<Vec<_>>()
                .join(", ");
            let summary_text = format!("Compacted {discarded} non-critical events: {narrative}.");
            kept.push(serde_json::json!({
                "event_type": "compaction_summary",
                "summary": summary_text,
                "counts": counts,
            }));
            CompactionResult {
                kept,
                discarded_count: discarded,
                summary: Some(summary_text),
            }
        } else {
            CompactionResult {
                kept,
                discarded_count: 0,
                summary: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(n: usize, event_type: &str) -> Vec<Value> {
        (0..n)
            .map(|i| serde_json::json!({"event_type": event_type, "i": i}))
            .collect()
    }

    #[test]
    fn rule_based_keeps_recent_plus_critical() {
        let manager = CompactionManager::new(5, vec!["agent_completed".into()]);
        let mut events = events(20, "tool_result");
        events[3] = serde_json::json!({"event_type": "agent_completed", "i": 3});
        let result = manager.compact(&events, CompactionMethod::RuleBased);
        assert!(result.kept.len() < events.len());
        assert!(result.kept.iter().any(|e| e["event_type"] == "agent_completed"));
        assert_eq!(result.discarded_count, events.len() - result.kept.len());
    }

    #[test]
    fn llm_based_summarizes_discarded_counts() {
        let manager = CompactionManager::new(5, vec!["agent_completed".into()]);
        let events = events(10, "tool_result");
        let result = manager.compact(&events, CompactionMethod::LlmBased);
        assert_eq!(result.discarded_count, 10);
        assert!(result.summary.is_some());
        assert_eq!(result.kept.len(), 1);
        assert_eq!(result.kept[0]["event_type"], "compaction_summary");
    }
}
