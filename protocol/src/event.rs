use serde::Deserialize;
use serde::Serialize;

/// Checkpoint lifecycle events carried in the `event` field of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEventKind {
    CreateCheckpoint,
    RecoverFromCheckpoint,
}

/// One tool-invocation event, as delivered by the host runtime on stdin.
///
/// The host sends whatever fields the firing hook point knows about, so every
/// field is optional and unknown fields are ignored. A missing, late, or
/// unparseable payload degrades to [`ToolInvocationEvent::default`], which
/// reads as a successful call by an unknown tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolInvocationEvent {
    pub tool_name: Option<String>,
    /// Present iff the invocation failed; carries the error message.
    pub error: Option<String>,
    pub event: Option<HookEventKind>,
    pub task_id: Option<String>,
    pub phase: Option<String>,
    pub completed_steps: Vec<String>,
    pub pending_steps: Vec<String>,
    /// Opaque task state snapshot, stored verbatim in checkpoints.
    pub state: serde_json::Value,
}

impl ToolInvocationEvent {
    /// Tool name reported when the payload carries none.
    pub const UNKNOWN_TOOL: &'static str = "unknown";

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn tool(&self) -> &str {
        self.tool_name.as_deref().unwrap_or(Self::UNKNOWN_TOOL)
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_payload_parses() {
        let raw = r#"{
            "tool_name": "Bash",
            "error": "exit code 1",
            "event": "CreateCheckpoint",
            "task_id": "T1",
            "phase": "build",
            "completed_steps": ["a"],
            "pending_steps": ["b", "c"],
            "state": {"cursor": 7}
        }"#;
        let ev = ToolInvocationEvent::from_json(raw).unwrap();
        assert_eq!(ev.tool(), "Bash");
        assert!(!ev.succeeded());
        assert_eq!(ev.event, Some(HookEventKind::CreateCheckpoint));
        assert_eq!(ev.pending_steps, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(ev.state["cursor"], 7);
    }

    #[test]
    fn partial_payload_fills_defaults() {
        let ev = ToolInvocationEvent::from_json(r#"{"tool_name": "Read"}"#).unwrap();
        assert_eq!(ev.tool(), "Read");
        assert!(ev.succeeded());
        assert!(ev.event.is_none());
        assert!(ev.completed_steps.is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let ev =
            ToolInvocationEvent::from_json(r#"{"tool_name": "Edit", "hook_event_name": "PostToolUse"}"#)
                .unwrap();
        assert_eq!(ev.tool(), "Edit");
    }

    #[test]
    fn default_event_is_an_unknown_success() {
        let ev = ToolInvocationEvent::default();
        assert_eq!(ev.tool(), ToolInvocationEvent::UNKNOWN_TOOL);
        assert!(ev.succeeded());
    }
}
