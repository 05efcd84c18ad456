//! Recovery of tool calls that the model wrote into its text content
//! between placeholder markers instead of using the structured channel.
//!
//! Everything here is pure: text in, [`ToolCall`]s out.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::providers::LlmResponse;
use crate::tools::ToolCall;

static PLACEHOLDER_ENVELOPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"<\[PLHD\d+_never_used_[a-f0-9]+\]>\s*(\[?\{[\s\S]*?\}\]?)\s*<\[PLHD\d+_never_used_[a-f0-9]+\]>",
    )
    .ok()
});

fn envelope() -> Option<&'static Regex> {
    PLACEHOLDER_ENVELOPE.as_ref()
}

/// Extract every recoverable tool call from `content`. A corrupt envelope
/// is logged and skipped; the others are still returned.
pub fn recover(content: &str) -> Vec<ToolCall> {
    let Some(re) = envelope() else {
        return Vec::new();
    };

    let mut calls = Vec::new();
    for (index, captures) in re.captures_iter(content).enumerate() {
        let Some(payload) = captures.get(1) else {
            continue;
        };
        match serde_json::from_str::<Value>(payload.as_str()) {
            Ok(Value::Array(items)) => {
                calls.extend(items.iter().filter_map(|item| to_call(item, index)));
            }
            Ok(item @ Value::Object(_)) => calls.extend(to_call(&item, index)),
            Ok(other) => warn!(index, "placeholder payload is not an object: {other}"),
            Err(e) => warn!(index, "skipping unparseable placeholder payload: {e}"),
        }
    }

    if !calls.is_empty() {
        debug!(count = calls.len(), "recovered inline tool calls");
    }
    calls
}

fn to_call(item: &Value, index: usize) -> Option<ToolCall> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let Some(name) = name else {
        warn!(index, "placeholder tool call without a name");
        return None;
    };

    let arguments = match item.get("parameters").or_else(|| item.get("arguments")) {
        None | Some(Value::Null) => "{}".to_string(),
        // Some models double-encode the arguments.
        Some(Value::String(raw)) => raw.clone(),
        Some(value) => value.to_string(),
    };

    Some(ToolCall {
        id: format!("placeholder_{}", uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments,
    })
}

/// Structured calls when present; otherwise whatever can be recovered from
/// the text. Never both, so no call runs twice.
pub fn resolve_tool_calls(response: &LlmResponse) -> Vec<ToolCall> {
    if !response.tool_calls.is_empty() {
        return response.tool_calls.clone();
    }
    recover(&response.text)
}

/// `content` with every placeholder envelope removed.
pub fn strip_placeholders(content: &str) -> String {
    match envelope() {
        Some(re) => re.replace_all(content, "").trim().to_string(),
        None => content.trim().to_string(),
    }
}
