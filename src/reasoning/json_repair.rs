// Lenient JSON recovery for LLM output
//
// Models wrap JSON in markdown fences, use typographic quotes, leave
// trailing commas or get cut off mid-object. These helpers pull the JSON
// block out of the noise and patch the common breakages before parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

/// Keys that mark a block as an agent decision
const AGENT_KEYS: [&str; 5] = ["action", "tool_name", "arguments", "reasoning", "confidence"];

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

#[derive(Debug, Error, PartialEq)]
pub enum JsonRepairError {
    #[error("no JSON block found in text")]
    NoJson,

    #[error("missing required keys: {0:?}")]
    MissingKeys(Vec<String>),

    #[error("invalid JSON: {0}")]
    Invalid(String),
}

/// Strip BOM, typographic quotes and markdown code fences
pub fn clean_text(text: &str) -> String {
    let text = text
        .replace('\u{feff}', "")
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim().to_string()
}

/// Top-level `{...}` / `[...]` blocks, found by bracket balancing
///
/// Brackets inside string literals are ignored. When nothing balances, the
/// span from the first `{` (or `[`) to the end is returned so truncated
/// output can still be repaired.
pub fn extract_json_blocks(text: &str) -> Vec<String> {
    let t = clean_text(text);
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in t.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        blocks.push(t[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if blocks.is_empty() {
        if let Some(s) = t.find('{').or_else(|| t.find('[')) {
            blocks.push(t[s..].to_string());
        }
    }
    blocks
}

/// Remove `//` and `/* */` comments outside string literals
fn strip_comments(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match (ch, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

/// Patch common breakages: comments, trailing commas, an unterminated
/// string and missing closing brackets
pub fn repair_json_string(s: &str) -> String {
    let s = clean_text(s);
    let s = strip_comments(&s);
    let mut s = TRAILING_COMMA.replace_all(&s, "$1").into_owned();

    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if in_string {
        s.push('"');
    }
    while let Some(closer) = stack.pop() {
        s.push(closer);
    }
    // A cut-off value can leave `"key": }` behind
    TRAILING_COMMA.replace_all(&s, "$1").trim().to_string()
}

/// First JSON block, preferring one that looks like an agent decision,
/// already repaired
pub fn extract_first_json(text: &str) -> Option<String> {
    let blocks = extract_json_blocks(text);
    let preferred = blocks
        .iter()
        .find(|b| AGENT_KEYS.iter().any(|k| b.contains(k)))
        .or_else(|| blocks.first())?;
    Some(repair_json_string(preferred))
}

/// Parse noisy text into JSON
///
/// With `best_effort`, an object missing some of `required_keys` is still
/// returned.
pub fn safe_parse_json(
    text: &str,
    required_keys: &[&str],
    best_effort: bool,
) -> Result<Value, JsonRepairError> {
    let candidates = match extract_first_json(text) {
        Some(first) => vec![first],
        None => extract_json_blocks(text),
    };
    if candidates.is_empty() {
        return Err(JsonRepairError::NoJson);
    }

    let mut last_error = JsonRepairError::NoJson;
    for raw in candidates {
        let repaired = repair_json_string(&raw);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(parsed) => {
                if let Value::Object(map) = &parsed {
                    let missing: Vec<String> = required_keys
                        .iter()
                        .filter(|k| !map.contains_key(**k))
                        .map(|k| k.to_string())
                        .collect();
                    if !missing.is_empty() && !best_effort {
                        last_error = JsonRepairError::MissingKeys(missing);
                        continue;
                    }
                }
                return Ok(parsed);
            }
            Err(e) => last_error = JsonRepairError::Invalid(e.to_string()),
        }
    }
    Err(last_error)
}

/// Parse LLM output into an action object, degrading to a conversation
pub fn normalize_llm_output(raw: &str, required_keys: &[&str]) -> Value {
    match safe_parse_json(raw, required_keys, true) {
        Ok(Value::Array(items)) => json!({
            "action": "conversation",
            "tool_name": null,
            "arguments": {},
            "reasoning": "La salida del modelo fue una lista; se retorna como contenido.",
            "confidence": 0.3,
            "content": items,
        }),
        Ok(parsed) => parsed,
        Err(e) => json!({
            "action": "conversation",
            "tool_name": null,
            "arguments": {},
            "reasoning": format!("Salida no estructurada o JSON inválido. Detalle: {}", e),
            "confidence": 0.1,
            "raw": raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_fence_and_smart_quotes() {
        let text = "```json\n{\u{201c}action\u{201d}: \u{201c}conversation\u{201d}}\n```";
        let parsed = safe_parse_json(text, &[], false).unwrap();
        assert_eq!(parsed["action"], "conversation");
    }

    #[test]
    fn test_prefers_agent_block() {
        let text = r#"Primero {"foo": 1} y luego {"action": "tool_call", "tool_name": "x"}"#;
        let block = extract_first_json(text).unwrap();
        assert!(block.contains("tool_call"));
    }

    #[test]
    fn test_repairs_truncated_output() {
        let text = r#"{"action": "clarify", "arguments": {"ids": [1, 2"#;
        let parsed = safe_parse_json(text, &["action"], false).unwrap();
        assert_eq!(parsed["arguments"]["ids"], json!([1, 2]));
    }

    #[test]
    fn test_repairs_unterminated_string() {
        let parsed = safe_parse_json(r#"{"reasoning": "sin cierre"#, &[], false).unwrap();
        assert_eq!(parsed["reasoning"], "sin cierre");
    }

    #[test]
    fn test_removes_comments_and_trailing_commas() {
        let text = "{\n  \"url\": \"http://x/y\", // comentario\n  /* bloque */ \"n\": 1,\n}";
        let parsed = safe_parse_json(text, &[], false).unwrap();
        assert_eq!(parsed["url"], "http://x/y");
        assert_eq!(parsed["n"], 1);
    }

    #[test]
    fn test_braces_inside_strings_do_not_split_blocks() {
        let blocks = extract_json_blocks(r#"{"a": "}{", "b": 2}"#);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_missing_keys() {
        let text = r#"{"action": "conversation"}"#;
        assert_eq!(
            safe_parse_json(text, &["action", "confidence"], false),
            Err(JsonRepairError::MissingKeys(vec!["confidence".to_string()]))
        );
        assert!(safe_parse_json(text, &["action", "confidence"], true).is_ok());
    }

    #[test]
    fn test_no_json() {
        assert_eq!(
            safe_parse_json("hola, ¿cómo estás?", &[], true),
            Err(JsonRepairError::NoJson)
        );
    }

    #[test]
    fn test_normalize_falls_back_to_conversation() {
        let out = normalize_llm_output("sin json", &["action"]);
        assert_eq!(out["action"], "conversation");
        assert_eq!(out["confidence"], 0.1);

        let list = normalize_llm_output("[1, 2]", &["action"]);
        assert_eq!(list["content"], json!([1, 2]));
    }
}
