//! Chat-completions stream: index-addressed deltas to canonical events.

use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

use parley_tool_runtime::provider::ConnectionError;
use parley_tool_runtime::stream::{StreamEvent, ToolCallChunk, UsageStats};

use crate::providers::http::error_message;
use crate::providers::sse::{FrameHandler, SseFrame};

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Frame handler for one `/chat/completions` stream. Only the opening
/// delta of a call carries its id; later deltas are matched by `index`.
#[derive(Debug, Default)]
pub(super) struct CompletionStream {
    ids: HashMap<u64, String>,
}

type Out = VecDeque<Result<StreamEvent, ConnectionError>>;

impl CompletionStream {
    fn tool_call(&mut self, delta: ToolCallDelta, out: &mut Out) {
        let index = delta.index.unwrap_or(0);
        let (name, arguments) = match delta.function {
            Some(f) => (f.name.filter(|n| !n.is_empty()), f.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };

        let id = match delta.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.ids.insert(index, id.clone());
                Some(id)
            }
            None => self.ids.get(&index).cloned(),
        };

        if id.is_none() && name.is_none() && arguments.is_empty() {
            return;
        }
        out.push_back(Ok(StreamEvent::ToolCallChunk(ToolCallChunk {
            id,
            name,
            arguments_delta: arguments,
        })));
    }
}

impl FrameHandler for CompletionStream {
    type Event = StreamEvent;

    fn handle(&mut self, frame: SseFrame, out: &mut Out) -> bool {
        let data = frame.data.trim();
        if data == "[DONE]" {
            return true;
        }
        let chunk: Chunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(error = %e, data, "skipping unparseable chunk");
                return false;
            }
        };

        if chunk.error.is_some() {
            out.push_back(Err(ConnectionError::Stream(error_message(data))));
            return true;
        }

        for choice in chunk.choices.into_iter().flatten() {
            let Some(delta) = choice.delta else { continue };
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                out.push_back(Ok(StreamEvent::Text { content }));
            }
            for call in delta.tool_calls.into_iter().flatten() {
                self.tool_call(call, out);
            }
        }

        if let Some(usage) = chunk.usage {
            out.push_back(Ok(StreamEvent::Usage(UsageStats {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })));
        }
        false
    }
}
