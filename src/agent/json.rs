//! Tolerant parsing of model responses into JSON objects.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// `<think>…</think>` reasoning blocks some local models emit before answering.
static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());

/// Remove reasoning blocks and surrounding whitespace.
pub fn strip_reasoning(response: &str) -> String {
    THINK_BLOCK.replace_all(response, "").trim().to_string()
}

/// Content of the first ``` fence, if the response carries one.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the opening fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let tag = after_fence[..body_start].trim();
    let body = if tag.is_empty() || tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        &after_fence[body_start..]
    } else {
        after_fence
    };
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Parse a model response as a JSON object.
///
/// Tries, in order: the whole (fence-stripped) text, then the substring from
/// the first `{` to the last `}`. Anything that is not an object is `None`.
pub fn parse_object(response: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_reasoning(response);
    let candidate = fenced_block(&cleaned).unwrap_or(&cleaned);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
        return Some(map);
    }

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if start >= end {
        return None;
    }
    match serde_json::from_str::<Value>(&candidate[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let map = parse_object(r#"{"action": "finish"}"#).unwrap();
        assert_eq!(map["action"], "finish");
    }

    #[test]
    fn parses_fenced_object() {
        let text = "Here you go:\n```json\n{\"action\": \"validate_data\"}\n```\n";
        assert_eq!(parse_object(text).unwrap()["action"], "validate_data");

        let text = "```\n{\"action\": \"save_to_database\"}\n```";
        assert_eq!(parse_object(text).unwrap()["action"], "save_to_database");
    }

    #[test]
    fn falls_back_to_embedded_object() {
        let text = "Sure! The decision is {\"action\": \"extract_data\", \"n\": {\"x\": 1}} hope that helps";
        let map = parse_object(text).unwrap();
        assert_eq!(map["action"], "extract_data");
        assert_eq!(map["n"]["x"], 1);
    }

    #[test]
    fn strips_reasoning_before_parsing() {
        let text = "<think>The user mentions {blood pressure}...</think>\n{\"health_records\": []}";
        let map = parse_object(text).unwrap();
        assert!(map.contains_key("health_records"));
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert!(parse_object("").is_none());
        assert!(parse_object("I could not find any health data.").is_none());
        assert!(parse_object("[1, 2, 3]").is_none());
        assert!(parse_object("} backwards {").is_none());
        assert!(parse_object("{not: valid json}").is_none());
    }
}
