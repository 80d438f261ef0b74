use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical events produced by a connection adapter.
/// Provider-agnostic: translated from Anthropic/OpenAI formats in the adapter layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text, in provider order.
    Text { content: String },
    /// Token accounting reported by the provider.
    Usage(UsageStats),
    /// One fragment of a tool call the model is emitting.
    ToolCallChunk(ToolCallChunk),
    /// A tool result the provider executed server-side.
    ToolResult {
        content: String,
        name: String,
        correlation_id: String,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }
}

/// Partial tool-call fragment.
///
/// The opening fragment usually carries `id` and `name`; later fragments carry
/// only `arguments_delta`. A fragment without an id belongs to the most
/// recently opened call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments_delta: String,
}

impl ToolCallChunk {
    /// Opening fragment of a call.
    pub fn start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_delta: String::new(),
        }
    }

    /// Argument fragment for a known call id.
    pub fn delta(id: impl Into<String>, arguments_delta: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
            arguments_delta: arguments_delta.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Events the executor hands to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Text {
        content: String,
    },
    Usage(UsageStats),
    /// The executor is about to run a tool ("using X...").
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

impl ChatEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            _ => None,
        }
    }
}
