//! Canonical action model shared by every stage of the runtime.
//!
//! Actions are ephemeral: they are created per model turn and folded into
//! history or tool results before the next turn starts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::history::Role;

/// What the model wants to do, independent of the provider that said it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Message(MessageAction),
    ToolCall(ToolCallAction),
    Plan(PlanAction),
    Error(ErrorAction),
}

/// A finished natural-language turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAction {
    pub content: String,
    pub role: Role,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MessageAction {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A validated request to run one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallAction {
    /// Tool name as registered in the tool registry.
    pub tool: String,
    /// Arguments, always a JSON object.
    pub args: Map<String, Value>,
    /// Correlates this call to its eventual result.
    pub id: String,
}

impl ToolCallAction {
    pub fn new(tool: impl Into<String>, args: Map<String, Value>, id: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args,
            id: id.into(),
        }
    }

    /// Arguments as a JSON value, as sent to tools and providers.
    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

/// An ordered multi-step intent. Currently only produced as 1-2 step chains.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanAction {
    pub steps: Vec<Action>,
}

/// A normalization failure.
///
/// `recoverable = true` means the caller may keep streaming text (or re-ask
/// the model); `false` means abort tool handling for this turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct ErrorAction {
    pub reason: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

impl ErrorAction {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            recoverable: true,
            raw_input: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            recoverable: false,
            raw_input: None,
        }
    }

    pub fn with_raw_input(mut self, raw: Value) -> Self {
        self.raw_input = Some(raw);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tagging() {
        let action = Action::ToolCall(ToolCallAction::new(
            "get_weather",
            serde_json::json!({"city": "Paris"}).as_object().cloned().unwrap(),
            "call_1",
        ));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["tool"], "get_weather");
        assert_eq!(json["args"]["city"], "Paris");
    }

    #[test]
    fn test_error_action_display() {
        let err = ErrorAction::recoverable("bad arguments for 'get_weather'");
        assert_eq!(err.to_string(), "bad arguments for 'get_weather'");
        assert!(err.recoverable);
        assert!(!ErrorAction::fatal("nope").recoverable);
    }

    #[test]
    fn test_message_metadata() {
        let msg = MessageAction::assistant("done").with_metadata("reason", serde_json::json!("depth"));
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.metadata["reason"], "depth");
    }
}
