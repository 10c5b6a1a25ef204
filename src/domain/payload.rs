//! Narrowing of raw settlement payloads to document text.

use serde_json::Value;

/// Object keys that may carry the document body, in lookup order.
const DOCUMENT_KEYS: [&str; 8] = [
    "html",
    "body_html",
    "htmlBody",
    "html_body",
    "body",
    "content",
    "text",
    "raw",
];

/// Wrapper keys searched one level down when no document key is present.
const NESTED_KEYS: [&str; 2] = ["payload", "data"];

/// Extract the document text from a raw payload.
///
/// Accepts a bare string or an object carrying the text under one of the known keys
/// (searching one nested `payload`/`data` object). Blank text narrows to None.
pub fn document_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => non_blank(s),
        Value::Object(map) => direct_text(map).or_else(|| {
            NESTED_KEYS
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(|v| match v {
                    Value::String(s) => non_blank(s),
                    Value::Object(inner) => direct_text(inner),
                    _ => None,
                })
        }),
        _ => None,
    }
}

fn direct_text(map: &serde_json::Map<String, Value>) -> Option<String> {
    DOCUMENT_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find_map(|v| v.as_str().and_then(non_blank))
}

fn non_blank(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
