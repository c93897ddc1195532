//! Lightweight structural validation of worker output against an agent's
//! `output_schema` (spec §4.6 step 4). `conclave_models::Tool`'s doc comment
//! already scopes schema handling to well-formedness rather than full
//! JSON-Schema draft 2020-12 semantics; this validator checks the handful of
//! keywords that matter for catching a malformed `final_output` — `type`,
//! `required`, `properties`, `items`, `enum` — recursively, and ignores the
//! rest of the draft (`$ref`, `oneOf`, numeric ranges, formats, ...).

use serde_json::Value;

/// Checks `instance` against `schema`, returning every violation found (an
/// empty vec means valid). Never panics on a malformed schema; unknown or
/// unsupported keywords are silently skipped.
pub fn validate(schema: &Value, instance: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check(schema, instance, "$", &mut errors);
    errors
}

fn check(schema: &Value, instance: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, instance) {
            errors.push(format!(
                "{path}: expected type {expected}, got {}",
                type_name(instance)
            ));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            errors.push(format!("{path}: value not in enum"));
        }
    }

    if let Some(obj) = instance.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required {
                if let Some(name) = field.as_str() {
                    if !obj.contains_key(name) {
                        errors.push(format!("{path}: missing required field '{name}'"));
                    }
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, sub_schema) in properties {
                if let Some(value) = obj.get(name) {
                    check(sub_schema, value, &format!("{path}.{name}"), errors);
                }
            }
        }
    }

    if let Some(items_schema) = schema.get("items") {
        if let Some(items) = instance.as_array() {
            for (idx, item) in items.iter().enumerate() {
                check(items_schema, item, &format!("{path}[{idx}]"), errors);
            }
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_object() {
        let schema = json!({
            "type": "object",
            "required": ["decision"],
            "properties": {"decision": {"type": "string"}}
        });
        let instance = json!({"decision": "approve"});
        assert!(validate(&schema, &instance).is_empty());
    }

    #[test]
    fn reports_missing_required_field() {
        let schema = json!({"type": "object", "required": ["decision"]});
        let instance = json!({"other": 1});
        let errors = validate(&schema, &instance);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("decision"));
    }

    #[test]
    fn reports_type_mismatch_in_nested_property() {
        let schema = json!({
            "type": "object",
            "properties": {"score": {"type": "number"}}
        });
        let instance = json!({"score": "high"});
        let errors = validate(&schema, &instance);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("$.score"));
    }

    #[test]
    fn validates_array_items() {
        let schema = json!({"type": "array", "items": {"type": "integer"}});
        let instance = json!([1, 2, "three"]);
        let errors = validate(&schema, &instance);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[2]"));
    }
}
