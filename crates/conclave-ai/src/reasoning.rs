//! Shared LLM-response JSON extraction (spec §9 "LLM responses arrive as
//! free-form text that must hold JSON. Extraction tries fenced code block
//! -> bare object -> whole string; failure is a recoverable event, not a
//! panic"). Used by both the worker (C11) and orchestrator (C12) loops.

use serde_json::Value;

/// Extracts the first JSON object/array from free-form LLM output.
/// Tries, in order: a ```json fenced block, a bare `{...}`/`[...]` span
/// found by bracket matching, then the whole trimmed string.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(fenced) = extract_fenced(text) {
        if let Ok(value) = serde_json::from_str(&fenced) {
            return Some(value);
        }
    }
    if let Some(bare) = extract_bare_object(text) {
        if let Ok(value) = serde_json::from_str(&bare) {
            return Some(value);
        }
    }
    serde_json::from_str(text.trim()).ok()
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_marker = &text[start + 3..];
    let after_marker = after_marker
        .strip_prefix("json")
        .or_else(|| after_marker.strip_prefix("JSON"))
        .unwrap_or(after_marker);
    let end = after_marker.find("```")?;
    Some(after_marker[..end].trim().to_string())
}

fn extract_bare_object(text: &str) -> Option<String> {
    let open_candidates = ['{', '['];
    let start = text
        .char_indices()
        .find(|(_, c)| open_candidates.contains(c))?;
    let (start_idx, open_char) = start;
    let close_char = if open_char == '{' { '}' } else { ']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (idx, ch) in text[start_idx..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open_char => depth += 1,
            c if c == close_char => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start_idx..start_idx + idx + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_fenced_block() {
        let text = "Here is my answer:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn extracts_bare_object_with_nesting() {
        let text = "reasoning... {\"a\": {\"b\": 2}, \"c\": [1,2,3]} trailing";
        assert_eq!(
            extract_json(text).unwrap(),
            serde_json::json!({"a": {"b": 2}, "c": [1,2,3]})
        );
    }

    #[test]
    fn falls_back_to_whole_string() {
        let text = "{\"a\": 1}";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn returns_none_on_garbage() {
        assert!(extract_json("not json at all").is_none());
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = "{\"msg\": \"a } b { c\"}";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"msg": "a } b { c"}));
    }
}
