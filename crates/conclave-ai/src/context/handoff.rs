//! Handoff rule resolution (spec §4.5 step 1, §9 design note: "Handoff
//! rules are a two-key table keyed `(from, to)` with wildcards; resolve by
//! selecting the rule with the highest `specificity_score`"). Rule
//! selection is a pure function, independently testable.

use std::collections::HashMap;

use conclave_contracts::AgentId;
use serde_json::Value;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// Prior outputs pass through unchanged.
    Full,
    /// Allow-list / deny-list filter on prior output fields.
    Scoped,
    /// Keep only identifier fields of the original input; drop prior outputs.
    Minimal,
}

impl Default for HandoffMode {
    fn default() -> Self {
        HandoffMode::Scoped
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffRule {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub mode: HandoffMode,
    #[serde(default)]
    pub allow_fields: Vec<String>,
    #[serde(default)]
    pub deny_fields: Vec<String>,
    #[serde(default)]
    pub identifier_fields: Vec<String>,
}

use serde::{Deserialize, Serialize};

/// Specificity: exact-exact beats exact-wildcard/wildcard-exact beats
/// wildcard-wildcard. Both directions score independently and are summed.
fn specificity(rule: &HandoffRule, from: &str, to: &str) -> Option<u8> {
    let from_matches = rule.from == from || rule.from == WILDCARD;
    let to_matches = rule.to == to || rule.to == WILDCARD;
    if !from_matches || !to_matches {
        return None;
    }
    let from_score = if rule.from == from { 2 } else { 0 };
    let to_score = if rule.to == to { 2 } else { 0 };
    Some(from_score + to_score)
}

/// Selects the rule with the highest specificity for `(from, to)`. Ties are
/// broken by table order (first match wins) to keep the function
/// deterministic without requiring a total order over rules.
pub fn select_rule<'a>(rules: &'a [HandoffRule], from: &str, to: &str) -> Option<&'a HandoffRule> {
    rules
        .iter()
        .filter_map(|rule| specificity(rule, from, to).map(|score| (score, rule)))
        .max_by_key(|(score, _)| *score)
        .map(|(_, rule)| rule)
}

/// Applies handoff scoping to `prior_outputs` and `original_input` per the
/// resolved rule's mode (spec §4.5 step 1).
pub fn apply_handoff(
    mode: HandoffMode,
    rule: Option<&HandoffRule>,
    mut prior_outputs: HashMap<AgentId, Value>,
    original_input: Option<Value>,
) -> (HashMap<AgentId, Value>, Option<Value>) {
    match mode {
        HandoffMode::Full => (prior_outputs, original_input),
        HandoffMode::Scoped => {
            if let Some(rule) = rule {
                for value in prior_outputs.values_mut() {
                    scope_value(value, &rule.allow_fields, &rule.deny_fields);
                }
            }
            (prior_outputs, original_input)
        }
        HandoffMode::Minimal => {
            let identifiers = rule.map(|r| r.identifier_fields.as_slice()).unwrap_or(&[]);
            let scoped_input = original_input.map(|input| {
                if identifiers.is_empty() {
                    input
                } else {
                    keep_fields(&input, identifiers)
                }
            });
            (HashMap::new(), scoped_input)
        }
    }
}

fn scope_value(value: &mut Value, allow: &[String], deny: &[String]) {
    let Value::Object(map) = value else { return };
    if !allow.is_empty() {
        map.retain(|key, _| allow.contains(key));
    }
    if !deny.is_empty() {
        map.retain(|key, _| !deny.contains(key));
    }
}

fn keep_fields(value: &Value, fields: &[String]) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut out = serde_json::Map::new();
    for field in fields {
        if let Some(v) = map.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(from: &str, to: &str) -> HandoffRule {
        HandoffRule {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    #[test]
    fn exact_match_beats_wildcard() {
        let rules = vec![
            rule(WILDCARD, WILDCARD),
            rule("intake", WILDCARD),
            rule("intake", "fraud_agent"),
        ];
        let selected = select_rule(&rules, "intake", "fraud_agent").unwrap();
        assert_eq!(selected.from, "intake");
        assert_eq!(selected.to, "fraud_agent");
    }

    #[test]
    fn partial_wildcard_beats_full_wildcard() {
        let rules = vec![rule(WILDCARD, WILDCARD), rule("intake", WILDCARD)];
        let selected = select_rule(&rules, "intake", "fraud_agent").unwrap();
        assert_eq!(selected.from, "intake");
    }

    #[test]
    fn no_match_returns_none() {
        let rules = vec![rule("intake", "fraud_agent")];
        assert!(select_rule(&rules, "coverage", "fraud_agent").is_none());
    }

    #[test]
    fn scoped_mode_applies_allow_list() {
        let mut outputs = HashMap::new();
        outputs.insert(
            AgentId::new("intake"),
            serde_json::json!({"claim_id": "C1", "secret": "s"}),
        );
        let rule = HandoffRule {
            from: "intake".into(),
            to: "fraud_agent".into(),
            mode: HandoffMode::Scoped,
            allow_fields: vec!["claim_id".into()],
            deny_fields: vec![],
            identifier_fields: vec![],
        };
        let (scoped, _) = apply_handoff(HandoffMode::Scoped, Some(&rule), outputs, None);
        let output = &scoped[&AgentId::new("intake")];
        assert!(output.get("claim_id").is_some());
        assert!(output.get("secret").is_none());
    }

    #[test]
    fn minimal_mode_drops_prior_outputs_and_keeps_identifiers() {
        let mut outputs = HashMap::new();
        outputs.insert(AgentId::new("intake"), serde_json::json!({"claim_id": "C1"}));
        let rule = HandoffRule {
            from: "intake".into(),
            to: "fraud_agent".into(),
            mode: HandoffMode::Minimal,
            identifier_fields: vec!["claim_id".into()],
            ..Default::default()
        };
        let input = serde_json::json!({"claim_id": "C1", "claim_amount": 15000});
        let (scoped, scoped_input) =
            apply_handoff(HandoffMode::Minimal, Some(&rule), outputs, Some(input));
        assert!(scoped.is_empty());
        assert_eq!(scoped_input.unwrap(), serde_json::json!({"claim_id": "C1"}));
    }
}
