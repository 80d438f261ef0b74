//! Turns an accumulated tool-call buffer into a validated [`ToolCallAction`].
//!
//! Pure over its input. The only non-determinism is id synthesis for
//! buffers that arrived without a call id.

use serde_json::{Map, Value};

use crate::accumulator::{RawArguments, ToolCallBuffer};
use crate::action::{ErrorAction, ToolCallAction};

const SYNTHETIC_ID_LEN: usize = 24;

/// Validate one fully accumulated buffer.
pub fn normalize_tool_call(buffer: &ToolCallBuffer) -> Result<ToolCallAction, ErrorAction> {
    let raw = || serde_json::to_value(buffer).unwrap_or(Value::Null);

    let tool = match buffer.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(ErrorAction::recoverable("tool call is missing a tool name")
                .with_raw_input(raw()));
        }
    };

    let args = match &buffer.arguments {
        RawArguments::Text(text) if text.trim().is_empty() => Value::Object(Map::new()),
        RawArguments::Text(text) => serde_json::from_str::<Value>(text).map_err(|e| {
            ErrorAction::recoverable(format!("invalid arguments for tool '{}': {}", tool, e))
                .with_raw_input(raw())
        })?,
        RawArguments::Structured(value) => value.clone(),
    };

    let args = match args {
        Value::Object(map) => map,
        other => {
            return Err(ErrorAction::fatal(format!(
                "arguments for tool '{}' must be an object, got {}",
                tool,
                json_kind(&other)
            ))
            .with_raw_input(raw()));
        }
    };

    let id = match buffer.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => synthesize_call_id(),
    };

    Ok(ToolCallAction { tool, args, id })
}

/// `call_` followed by 24 alphanumeric characters.
pub fn synthesize_call_id() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &token[..SYNTHETIC_ID_LEN])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
