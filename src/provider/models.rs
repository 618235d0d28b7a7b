use serde::Serialize;
use serde_json::Value;

const BODY_PREVIEW_LIMIT: usize = 256;

#[derive(Debug, Serialize)]
pub(super) struct StatsRequest {
    pub(super) unencrypted: bool,
}

/// Turn the stats response into report bodies. Strings are taken verbatim,
/// anything else is re-serialized compactly.
pub(super) fn payloads_from(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| match value {
            Value::String(body) => body,
            other => other.to_string(),
        })
        .collect()
}

pub(super) fn body_preview(body: &[u8]) -> String {
    if body.is_empty() {
        return "<empty>".to_string();
    }
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    let mut preview = String::from_utf8_lossy(&body[..end]).to_string();
    if body.len() > BODY_PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview.replace('\n', "\\n")
}
