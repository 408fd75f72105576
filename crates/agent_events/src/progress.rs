//! Per-flavor progress-stage inference.
//!
//! Purely informational: feeds live UI, never control flow.

use serde_json::Value;

use crate::flavor::BackendFlavor;

/// Coarse lifecycle stage of a backend run.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum ProgressStage {
    #[default]
    Started,
    Analyzing,
    Executing,
    Completed,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Analyzing => "analyzing",
            Self::Executing => "executing",
            Self::Completed => "completed",
        }
    }
}

/// A progress observation, optionally naming the tool being run.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub tool: Option<String>,
}

impl ProgressUpdate {
    fn stage(stage: ProgressStage) -> Self {
        Self { stage, tool: None }
    }
}

fn str_field<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event.get(key).and_then(Value::as_str)
}

/// Infers a progress update from one event, under an already-known flavor.
pub fn infer_progress(event: &Value, flavor: BackendFlavor) -> Option<ProgressUpdate> {
    match flavor {
        BackendFlavor::Claude => match str_field(event, "subtype") {
            Some("tool_use") => Some(ProgressUpdate {
                stage: ProgressStage::Executing,
                tool: str_field(event, "tool_name")
                    .or_else(|| str_field(event, "name"))
                    .map(str::to_owned),
            }),
            Some("tool_result") => Some(ProgressUpdate::stage(ProgressStage::Executing)),
            _ => None,
        },
        BackendFlavor::Opencode => {
            let state = event.pointer("/part/state")?;
            let name = state
                .as_str()
                .or_else(|| state.get("status").and_then(Value::as_str))?;
            let stage = match name {
                "input" => ProgressStage::Analyzing,
                "running" => ProgressStage::Executing,
                "completed" | "error" => ProgressStage::Completed,
                _ => ProgressStage::Executing,
            };
            Some(ProgressUpdate::stage(stage))
        }
        BackendFlavor::Codex => {
            if str_field(event, "type") == Some("command_execution") {
                return Some(ProgressUpdate::stage(ProgressStage::Executing));
            }
            if event.pointer("/item/type").and_then(Value::as_str) == Some("message") {
                let content = event
                    .pointer("/item/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !content.starts_with("Thinking") {
                    return Some(ProgressUpdate::stage(ProgressStage::Analyzing));
                }
            }
            None
        }
        BackendFlavor::Gemini => {
            let tool_use_truthy = match event.get("tool_use") {
                None | Some(Value::Null) => false,
                Some(Value::Bool(b)) => *b,
                Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
                Some(Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            };
            if str_field(event, "type") == Some("tool_use") || tool_use_truthy {
                return Some(ProgressUpdate::stage(ProgressStage::Executing));
            }
            if str_field(event, "role") == Some("model") && event.get("delta").is_some() {
                return Some(ProgressUpdate::stage(ProgressStage::Analyzing));
            }
            None
        }
        BackendFlavor::Unknown => None,
    }
}
