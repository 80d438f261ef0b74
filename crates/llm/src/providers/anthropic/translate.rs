//! Translation between canonical history and the Anthropic Messages format.

use serde_json::{json, Value};

use parley_tool_runtime::history::{HistoryEntry, Role};
use parley_tool_runtime::provider::ModelRequest;
use parley_tool_runtime::tool::ToolDefinition;

pub(super) fn tool_definition_to_anthropic(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

fn assistant_blocks(entry: &HistoryEntry) -> Vec<Value> {
    let mut blocks = Vec::new();
    if !entry.text().is_empty() {
        blocks.push(json!({"type": "text", "text": entry.text()}));
    }
    for call in &entry.tool_calls {
        let input = if call.arguments.is_object() {
            call.arguments.clone()
        } else {
            json!({})
        };
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": input,
        }));
    }
    blocks
}

/// Append blocks, folding into the previous message when the role repeats.
/// The API wants alternating turns.
fn push_merged(messages: &mut Vec<Value>, role: &str, blocks: Vec<Value>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        if last["role"] == role {
            if let Some(content) = last["content"].as_array_mut() {
                content.extend(blocks);
                return;
            }
        }
    }
    messages.push(json!({"role": role, "content": blocks}));
}

/// Messages plus the system prompt. System entries in the history are
/// appended to the request's system prompt.
pub(super) fn messages_to_anthropic(request: &ModelRequest) -> (Vec<Value>, Option<String>) {
    let mut system: Vec<&str> = request
        .system_prompt
        .iter()
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
        .collect();
    let mut messages = Vec::new();

    for entry in &request.messages {
        match entry.role {
            Role::System => {
                if !entry.text().trim().is_empty() {
                    system.push(entry.text());
                }
            }
            Role::User => {
                if !entry.text().is_empty() {
                    push_merged(
                        &mut messages,
                        "user",
                        vec![json!({"type": "text", "text": entry.text()})],
                    );
                }
            }
            Role::Assistant => push_merged(&mut messages, "assistant", assistant_blocks(entry)),
            Role::Tool => push_merged(
                &mut messages,
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": entry.tool_call_id,
                    "content": entry.text(),
                })],
            ),
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (messages, system)
}

pub(super) fn request_body(request: &ModelRequest) -> Value {
    let (messages, system) = messages_to_anthropic(request);
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "stream": true,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(tool_definition_to_anthropic)
                .collect(),
        );
    }
    if let Some(system) = system {
        body["system"] = Value::String(system);
    }
    body
}

pub(super) fn probe_body(model: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{"role": "user", "content": "ping"}],
    })
}
