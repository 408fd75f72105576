use serde_json::Value;

/// Which backend CLI a stream (or event) came from.
///
/// Inferred from event shape rather than declared, because every backend
/// speaks its own JSONL dialect and the wrapper sees only stdout.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum BackendFlavor {
    Codex,
    Claude,
    Gemini,
    Opencode,
    #[default]
    Unknown,
}

impl BackendFlavor {
    /// Parses a backend tag case-insensitively. Unknown names map to
    /// [`BackendFlavor::Unknown`]; callers decide whether that is an error.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "codex" => Self::Codex,
            "claude" => Self::Claude,
            "gemini" => Self::Gemini,
            "opencode" => Self::Opencode,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BackendFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a single decoded event by shape.
///
/// Rules are ordered; the first match wins. The schemas of the four backends
/// overlap (several emit `type` and `session_id`), so the discriminating keys
/// are checked from most to least distinctive.
pub fn classify_event(event: &Value) -> BackendFlavor {
    if event.get("thread_id").is_some() || event.pointer("/item/type").is_some() {
        return BackendFlavor::Codex;
    }

    let type_field = event.get("type").and_then(Value::as_str);
    if event.get("subtype").is_some()
        || event.get("result").is_some()
        || (type_field == Some("result") && event.get("session_id").is_some())
    {
        return BackendFlavor::Claude;
    }

    if event.get("role").is_some()
        || event.get("delta").is_some()
        || (type_field == Some("init") && event.get("session_id").is_some())
    {
        return BackendFlavor::Gemini;
    }

    if event.get("sessionID").is_some() && event.get("part").is_some() {
        return BackendFlavor::Opencode;
    }

    BackendFlavor::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(BackendFlavor::parse("Codex"), BackendFlavor::Codex);
        assert_eq!(BackendFlavor::parse("CLAUDE"), BackendFlavor::Claude);
        assert_eq!(BackendFlavor::parse(" gemini "), BackendFlavor::Gemini);
        assert_eq!(BackendFlavor::parse("OpenCode"), BackendFlavor::Opencode);
        assert_eq!(BackendFlavor::parse("cursor"), BackendFlavor::Unknown);
    }

    #[test]
    fn codex_shapes_win_over_later_rules() {
        assert_eq!(
            classify_event(&json!({"thread_id": "t1"})),
            BackendFlavor::Codex
        );
        // An event that also carries `result` still classifies as Codex
        // because the rules apply in order.
        assert_eq!(
            classify_event(&json!({"item": {"type": "message"}, "result": "x"})),
            BackendFlavor::Codex
        );
    }

    #[test]
    fn claude_shapes() {
        assert_eq!(
            classify_event(&json!({"subtype": "tool_use"})),
            BackendFlavor::Claude
        );
        assert_eq!(
            classify_event(&json!({"type": "result", "session_id": "abc"})),
            BackendFlavor::Claude
        );
    }

    #[test]
    fn gemini_shapes() {
        assert_eq!(
            classify_event(&json!({"role": "model"})),
            BackendFlavor::Gemini
        );
        assert_eq!(
            classify_event(&json!({"delta": "chunk"})),
            BackendFlavor::Gemini
        );
        assert_eq!(
            classify_event(&json!({"type": "init", "session_id": "g1"})),
            BackendFlavor::Gemini
        );
    }

    #[test]
    fn opencode_requires_both_keys() {
        assert_eq!(
            classify_event(&json!({"sessionID": "s", "part": {}})),
            BackendFlavor::Opencode
        );
        assert_eq!(
            classify_event(&json!({"sessionID": "s"})),
            BackendFlavor::Unknown
        );
    }

    #[test]
    fn unclassifiable_events_stay_unknown() {
        assert_eq!(classify_event(&json!({"foo": 1})), BackendFlavor::Unknown);
        assert_eq!(classify_event(&json!({})), BackendFlavor::Unknown);
    }
}
