//! Folds `tool_call_chunk` fragments into one buffer per call.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::ToolCallChunk;

/// Arguments as they arrived from the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawArguments {
    /// Concatenated argument fragments, not yet parsed.
    Text(String),
    /// Already structured (some providers send whole objects).
    Structured(Value),
}

impl Default for RawArguments {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Fully accumulated tool-call buffer for one call id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallBuffer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: RawArguments,
}

impl ToolCallBuffer {
    fn push_fragment(&mut self, fragment: &str) {
        match &mut self.arguments {
            RawArguments::Text(text) => text.push_str(fragment),
            RawArguments::Structured(_) => {
                // structured arguments are complete already; later text wins
                self.arguments = RawArguments::Text(fragment.to_string());
            }
        }
    }
}

/// Collects fragments for every call of one model turn, keeping first-seen order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    buffers: IndexMap<String, ToolCallBuffer>,
    current: Option<String>,
    anonymous: usize,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: ToolCallChunk) {
        let key = match chunk.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.key_for_anonymous(chunk.name.is_some()),
        };

        let buffer = self.buffers.entry(key.clone()).or_insert_with(|| ToolCallBuffer {
            id: chunk.id.clone().filter(|id| !id.is_empty()),
            ..Default::default()
        });
        if let Some(name) = chunk.name.filter(|n| !n.is_empty()) {
            buffer.name.get_or_insert(name);
        }
        if !chunk.arguments_delta.is_empty() {
            buffer.push_fragment(&chunk.arguments_delta);
        }
        self.current = Some(key);
    }

    /// Key for a fragment without an id: continue the open call unless the
    /// fragment names a new tool while the open one is already named.
    fn key_for_anonymous(&mut self, names_tool: bool) -> String {
        if let Some(current) = &self.current {
            let open_is_named = self
                .buffers
                .get(current)
                .is_some_and(|b| b.name.is_some());
            if !(names_tool && open_is_named) {
                return current.clone();
            }
        }
        self.anonymous += 1;
        format!("__anonymous_{}", self.anonymous)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Drain all buffers in first-seen order.
    pub fn finish(self) -> Vec<ToolCallBuffer> {
        self.buffers.into_values().collect()
    }
}
