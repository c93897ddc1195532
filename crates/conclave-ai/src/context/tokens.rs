//! Token estimation (spec §4.4 `token_budget_enforcer`, §9 "Token
//! budgeting tolerates absence of an accurate tokenizer"). Every downstream
//! decision consults an integer estimate only, never a byte-exact count.

use serde_json::Value;

/// Approximates token count for arbitrary JSON by serializing it and
/// applying the 4-chars-per-token heuristic documented in spec §9. A real
/// tokenizer can be substituted by implementing `TokenEstimator`; the
/// platform does not require one to be wired in.
pub trait TokenEstimator: Send + Sync {
    fn estimate_str(&self, text: &str) -> usize;

    fn estimate_value(&self, value: &Value) -> usize {
        self.estimate_str(&value.to_string())
    }
}

/// The documented fallback: 4 characters ≈ 1 token.
pub struct HeuristicTokenEstimator;

impl TokenEstimator for HeuristicTokenEstimator {
    fn estimate_str(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4).max(1)
    }
}

/// Per-compilation lineage record (spec §4.5 step 3: "attach lineage
/// record to the Context Lineage Tracker").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextLineageRecord {
    pub compilation_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub processor_execution_log: Vec<ProcessorExecutionEntry>,
    pub truncated: bool,
    pub compacted: bool,
    pub memories_attached: usize,
    pub artifacts_attached: usize,
    pub budget_utilization: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessorExecutionEntry {
    pub processor: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub modifications: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_rounds_up_and_never_zero() {
        let estimator = HeuristicTokenEstimator;
        assert_eq!(estimator.estimate_str(""), 1);
        assert_eq!(estimator.estimate_str("a"), 1);
        assert_eq!(estimator.estimate_str("abcd"), 1);
        assert_eq!(estimator.estimate_str("abcde"), 2);
    }
}
