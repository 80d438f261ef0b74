//! Translation between canonical history and the chat-completions format.

use serde_json::{json, Value};

use parley_tool_runtime::history::{HistoryEntry, Role};
use parley_tool_runtime::provider::ModelRequest;
use parley_tool_runtime::tool::ToolDefinition;

/// How a provider names the output budget and whether the model takes a
/// temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dialect {
    /// api.openai.com: `max_completion_tokens`.
    OpenAi,
    /// Groq, OpenRouter, Ollama and other compatible servers: `max_tokens`.
    Compatible,
}

pub(super) fn tool_definition_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

pub(super) fn message_to_openai(entry: &HistoryEntry) -> Value {
    match entry.role {
        Role::System => json!({"role": "system", "content": entry.text()}),
        Role::User => json!({"role": "user", "content": entry.text()}),
        Role::Assistant if entry.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": entry.text()})
        }
        Role::Assistant => {
            let calls: Vec<Value> = entry
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({"role": "assistant", "content": entry.content, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": entry.tool_call_id,
            "content": entry.text(),
        }),
    }
}

/// Reasoning models reject a custom temperature.
fn is_reasoning_model(model: &str) -> bool {
    let bare = model.rsplit('/').next().unwrap_or(model);
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| bare.starts_with(prefix))
}

fn token_key(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::OpenAi => "max_completion_tokens",
        Dialect::Compatible => "max_tokens",
    }
}

pub(super) fn request_body(request: &ModelRequest, dialect: Dialect) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(request.messages.iter().map(message_to_openai));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    body[token_key(dialect)] = json!(request.max_tokens);
    if !(dialect == Dialect::OpenAi && is_reasoning_model(&request.model)) {
        body["temperature"] = json!(request.temperature);
    }
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(tool_definition_to_openai).collect());
    }
    body
}

pub(super) fn probe_body(model: &str, max_tokens: u32, dialect: Dialect) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [{"role": "user", "content": "ping"}],
    });
    body[token_key(dialect)] = json!(max_tokens);
    body
}
