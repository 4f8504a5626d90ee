//! Best-effort extraction of JSON from free-form model replies.
//!
//! Models wrap JSON in code fences, prose, or emit JSON5-ish syntax. Every
//! function here returns `None` instead of failing when nothing usable is found.

use serde::de::DeserializeOwned;
use serde_json::Value;

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn parse_lenient(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .or_else(|| json5::from_str::<Value>(candidate).ok())
}

/// First JSON object or array found in `raw`.
pub fn extract_json(raw: &str) -> Option<Value> {
    let body = strip_code_fence(raw);
    if let Some(value) = parse_lenient(body) {
        return Some(value);
    }
    let object = balanced_slice(body, '{', '}').and_then(parse_lenient);
    let array = balanced_slice(body, '[', ']').and_then(parse_lenient);
    match (object, array) {
        (Some(o), Some(a)) => {
            // Prefer whichever starts first in the reply.
            let o_at = body.find('{').unwrap_or(usize::MAX);
            let a_at = body.find('[').unwrap_or(usize::MAX);
            Some(if a_at < o_at { a } else { o })
        }
        (o, a) => o.or(a),
    }
}

pub fn extract_typed<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(extract_json(raw)?).ok()
}

/// The array under `key`, or the reply itself when it is a bare array.
pub fn extract_list(raw: &str, key: &str) -> Vec<Value> {
    match extract_json(raw) {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"chats\": []}\n```";
        assert_eq!(extract_json(raw), Some(json!({"chats": []})));
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let raw = "Here is what I found:\n{\"locations\": [{\"location_text\": \"Rome\"}]}\nHope it helps.";
        let items = extract_list(raw, "locations");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["location_text"], "Rome");
    }

    #[test]
    fn json5_style_replies_are_accepted() {
        let raw = "{chats: [{type: 'group', confidence: 'high',},],}";
        let items = extract_list(raw, "chats");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], "group");
    }

    #[test]
    fn malformed_replies_yield_nothing() {
        assert_eq!(extract_json("no structure here"), None);
        assert_eq!(extract_json("{ broken: "), None);
        assert!(extract_list("[1, 2", "chats").is_empty());
        assert!(extract_list("{\"chats\": \"none\"}", "chats").is_empty());
    }

    #[test]
    fn bare_arrays_are_lists() {
        assert_eq!(extract_list("[{\"a\": 1}]", "chats").len(), 1);
    }
}
