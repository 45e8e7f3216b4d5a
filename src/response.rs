//! Response Normalizer
//!
//! Extracts text and usage from backend JSON regardless of where each
//! protocol family puts it. Every function here is total: missing or
//! mistyped fields produce `""` / `None`, never a panic.

use serde_json::Value;

use crate::types::{ApiFormat, Metadata, ModelUsage};

/// Field names scanned when a payload does not have its documented shape.
pub const ALTERNATE_CONTENT_FIELDS: [&str; 5] = ["text", "content", "result", "output", "response"];

/// Dify/HKGAI stream event carrying an answer increment.
pub const MESSAGE_EVENT: &str = "message";
/// Dify/HKGAI stream event carrying final metadata.
pub const MESSAGE_END_EVENT: &str = "message_end";
/// Dify/HKGAI stream event reporting a backend failure.
pub const ERROR_EVENT: &str = "error";

/// Extract the answer text of a complete (non-streamed) response.
pub fn extract_content(format: ApiFormat, json: &Value) -> String {
    let primary = match format {
        ApiFormat::OpenAi => json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str),
        ApiFormat::Dify | ApiFormat::Hkgai => json.get("answer").and_then(Value::as_str),
    };
    match primary {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => scan_alternates(json),
    }
}

/// Extract the text increment of one stream frame.
///
/// `event` is the name from a preceding SSE `event:` line, used when the
/// payload does not carry its own `event` field.
pub fn extract_delta(format: ApiFormat, json: &Value, event: Option<&str>) -> String {
    match format {
        ApiFormat::OpenAi => json
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ApiFormat::Dify | ApiFormat::Hkgai => {
            if frame_event(json, event) != Some(MESSAGE_EVENT) {
                return String::new();
            }
            json.get("answer")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        }
    }
}

/// Event name of a dify/hkgai frame, payload field first.
pub fn frame_event<'a>(json: &'a Value, event: Option<&'a str>) -> Option<&'a str> {
    json.get("event").and_then(Value::as_str).or(event)
}

/// Backend error message carried by a dify/hkgai `error` frame.
pub fn extract_stream_error(format: ApiFormat, json: &Value, event: Option<&str>) -> Option<String> {
    match format {
        ApiFormat::OpenAi => json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string),
        ApiFormat::Dify | ApiFormat::Hkgai => (frame_event(json, event) == Some(ERROR_EVENT))
            .then(|| {
                json.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown backend error")
                    .to_string()
            }),
    }
}

/// Usage block, `None` when the backend did not report it.
pub fn extract_usage(format: ApiFormat, json: &Value) -> Option<ModelUsage> {
    let usage = match format {
        ApiFormat::OpenAi => json.get("usage"),
        ApiFormat::Dify | ApiFormat::Hkgai => json.pointer("/metadata/usage"),
    }?;
    if !usage.is_object() {
        return None;
    }

    let field = |name: &str| {
        usage
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    let prompt = field("prompt_tokens");
    let completion = field("completion_tokens");
    let total = field("total_tokens");
    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }

    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    Some(ModelUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: total.unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
    })
}

/// Identifiers worth passing on to callers (`conversation_id`, `message_id`, `id`).
pub fn extract_identifiers(json: &Value) -> Metadata {
    ["conversation_id", "message_id", "id"]
        .into_iter()
        .filter_map(|key| {
            json.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), Value::String(v.to_string())))
        })
        .collect()
}

// Some backends answer with a bare object or an unannotated array instead
// of their documented shape.
fn scan_alternates(json: &Value) -> String {
    let candidate = match json {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(json),
        _ => None,
    };
    let Some(object) = candidate.and_then(Value::as_object) else {
        return match json {
            Value::Array(items) => items
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
    };

    ALTERNATE_CONTENT_FIELDS
        .iter()
        .find_map(|field| {
            object
                .get(*field)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
        })
        .unwrap_or_default()
        .to_string()
}
