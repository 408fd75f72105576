//! Best-effort accessors over decoded backend events.
//!
//! Events stay untyped (`serde_json::Value`); each backend's dialect drifts
//! too often for a rigid schema. These helpers pull out the two things every
//! consumer needs — the user-facing message text and the session id — and
//! nothing else.

use serde_json::Value;

use crate::flavor::BackendFlavor;

fn str_field<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event.get(key).and_then(Value::as_str)
}

/// Extracts the message fragment carried by one event, if any.
pub fn message_fragment(event: &Value, flavor: BackendFlavor) -> Option<String> {
    match flavor {
        BackendFlavor::Codex => event.get("item").and_then(codex_item_message),
        BackendFlavor::Claude => str_field(event, "result")
            .or_else(|| str_field(event, "content"))
            .or_else(|| {
                event
                    .pointer("/tool_use_result/stdout")
                    .and_then(Value::as_str)
            })
            .map(str::to_owned),
        BackendFlavor::Gemini => {
            if str_field(event, "type") == Some("tool_result") {
                if let Some(output) = str_field(event, "output") {
                    return Some(output.to_owned());
                }
            }
            str_field(event, "content").map(str::to_owned)
        }
        BackendFlavor::Opencode => event.get("part").and_then(opencode_part_message),
        BackendFlavor::Unknown => str_field(event, "content")
            .or_else(|| str_field(event, "text"))
            .or_else(|| str_field(event, "message"))
            .map(str::to_owned),
    }
}

/// Codex wraps its payload in an `item` envelope. The envelope is usually an
/// object but some builds double-encode it as a JSON string.
fn codex_item_message(item: &Value) -> Option<String> {
    if let Some(raw) = item.as_str() {
        let inner: Value = serde_json::from_str(raw).ok()?;
        return codex_item_message(&inner);
    }

    if str_field(item, "type") == Some("command_execution") {
        if let Some(output) = str_field(item, "aggregated_output") {
            return Some(output.to_owned());
        }
    }

    str_field(item, "content")
        .or_else(|| str_field(item, "text"))
        .map(str::to_owned)
}

/// Opencode's `part` envelope mirrors Codex's quirk: tool output lives under
/// `part.state.output`, and the whole part may arrive double-encoded.
fn opencode_part_message(part: &Value) -> Option<String> {
    if let Some(raw) = part.as_str() {
        let inner: Value = serde_json::from_str(raw).ok()?;
        return opencode_part_message(&inner);
    }

    if str_field(part, "type") == Some("tool") {
        if let Some(output) = part.pointer("/state/output").and_then(Value::as_str) {
            return Some(output.to_owned());
        }
    }

    str_field(part, "text")
        .or_else(|| str_field(part, "content"))
        .map(str::to_owned)
}

/// Extracts the backend-assigned session id carried by one event, if any.
pub fn session_id(event: &Value, flavor: BackendFlavor) -> Option<String> {
    let id = match flavor {
        BackendFlavor::Codex => str_field(event, "thread_id"),
        BackendFlavor::Claude | BackendFlavor::Gemini => str_field(event, "session_id"),
        BackendFlavor::Opencode => str_field(event, "sessionID"),
        BackendFlavor::Unknown => str_field(event, "session_id")
            .or_else(|| str_field(event, "sessionId"))
            .or_else(|| str_field(event, "thread_id")),
    };
    id.filter(|id| !id.is_empty()).map(str::to_owned)
}

/// Whether this event marks the backend's own notion of run completion.
///
/// Informational: parsing always runs to EOF regardless.
pub fn is_completion(event: &Value, flavor: BackendFlavor) -> bool {
    let type_field = str_field(event, "type");
    match flavor {
        BackendFlavor::Codex | BackendFlavor::Opencode => {
            matches!(type_field, Some("completed") | Some("done"))
        }
        BackendFlavor::Claude => {
            type_field == Some("result") || str_field(event, "subtype") == Some("success")
        }
        BackendFlavor::Gemini => {
            str_field(event, "status") == Some("completed") || type_field == Some("done")
        }
        BackendFlavor::Unknown => false,
    }
}
