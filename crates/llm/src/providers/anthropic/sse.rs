//! Anthropic Messages stream: typed content blocks to canonical events.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

use parley_tool_runtime::provider::ConnectionError;
use parley_tool_runtime::stream::{StreamEvent, ToolCallChunk, UsageStats};

use crate::providers::http::error_message;
use crate::providers::sse::{FrameHandler, SseFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Block {
    Text,
    ToolUse { id: String },
    /// Server-side tool blocks and anything newer than this adapter.
    Other,
}

/// Content blocks seen so far, keyed by stream index. Argument deltas only
/// carry the index, so this is how they find their tool_use id.
#[derive(Debug, Default)]
pub(super) struct BlockTracker {
    blocks: HashMap<u64, Block>,
}

impl BlockTracker {
    pub(super) fn open(&mut self, index: u64, block: Block) {
        self.blocks.insert(index, block);
    }

    pub(super) fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(&index)
    }
}

/// Frame handler for one `/v1/messages` stream.
#[derive(Debug, Default)]
pub(super) struct MessageStream {
    tracker: BlockTracker,
    input_tokens: u32,
}

type Out = VecDeque<Result<StreamEvent, ConnectionError>>;

impl MessageStream {
    fn block_start(&mut self, data: &Value, out: &mut Out) {
        let index = data["index"].as_u64().unwrap_or(0);
        let block = &data["content_block"];
        match block["type"].as_str() {
            Some("text") => {
                self.tracker.open(index, Block::Text);
                if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                    out.push_back(Ok(StreamEvent::text(text)));
                }
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                let chunk = ToolCallChunk {
                    id: (!id.is_empty()).then(|| id.clone()),
                    name: (!name.is_empty()).then_some(name),
                    arguments_delta: String::new(),
                };
                self.tracker.open(index, Block::ToolUse { id });
                out.push_back(Ok(StreamEvent::ToolCallChunk(chunk)));
            }
            Some(kind) if kind.ends_with("_tool_result") => {
                self.tracker.open(index, Block::Other);
                out.push_back(Ok(StreamEvent::ToolResult {
                    content: block["content"].to_string(),
                    name: kind.trim_end_matches("_tool_result").to_string(),
                    correlation_id: block["tool_use_id"].as_str().unwrap_or("").to_string(),
                }));
            }
            other => {
                trace!(block_type = ?other, index, "untracked content block");
                self.tracker.open(index, Block::Other);
            }
        }
    }

    fn block_delta(&self, data: &Value, out: &mut Out) {
        let index = data["index"].as_u64().unwrap_or(0);
        let delta = &data["delta"];
        match delta["type"].as_str() {
            Some("text_delta") => {
                if let Some(text) = delta["text"].as_str() {
                    out.push_back(Ok(StreamEvent::text(text)));
                }
            }
            Some("input_json_delta") => {
                let partial = delta["partial_json"].as_str().unwrap_or("");
                if partial.is_empty() {
                    return;
                }
                let id = match self.tracker.get(index) {
                    Some(Block::ToolUse { id }) if !id.is_empty() => Some(id.clone()),
                    Some(Block::ToolUse { .. }) | None => None,
                    // input for a server-side tool
                    Some(_) => return,
                };
                out.push_back(Ok(StreamEvent::ToolCallChunk(ToolCallChunk {
                    id,
                    name: None,
                    arguments_delta: partial.to_string(),
                })));
            }
            _ => {}
        }
    }
}

impl FrameHandler for MessageStream {
    type Event = StreamEvent;

    fn handle(&mut self, frame: SseFrame, out: &mut Out) -> bool {
        let Ok(data) = serde_json::from_str::<Value>(&frame.data) else {
            trace!(data = %frame.data, "skipping non-JSON frame");
            return false;
        };
        let kind = frame
            .event
            .clone()
            .or_else(|| data["type"].as_str().map(String::from))
            .unwrap_or_default();

        match kind.as_str() {
            "message_start" => {
                self.input_tokens = data["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0) as u32;
            }
            "content_block_start" => self.block_start(&data, out),
            "content_block_delta" => self.block_delta(&data, out),
            "message_delta" => {
                let usage = &data["usage"];
                if let Some(output) = usage["output_tokens"].as_u64() {
                    let input = usage["input_tokens"]
                        .as_u64()
                        .map(|v| v as u32)
                        .unwrap_or(self.input_tokens);
                    out.push_back(Ok(StreamEvent::Usage(UsageStats {
                        input_tokens: input,
                        output_tokens: output as u32,
                    })));
                }
            }
            "message_stop" => return true,
            "error" => {
                out.push_back(Err(ConnectionError::Stream(error_message(&frame.data))));
                return true;
            }
            "content_block_stop" | "ping" => {}
            other => trace!(event_type = other, "ignoring unknown SSE event type"),
        }
        false
    }
}
