//! Canonical conversation history and the just-in-time sanitizer.
//!
//! The executor keeps exactly one history. [`sanitize`] is a pure function
//! applied to a copy right before each model call; it never mutates the
//! caller's history.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::action::ToolCallAction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A tool call declared by an assistant entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclaredToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl From<&ToolCallAction> for DeclaredToolCall {
    fn from(action: &ToolCallAction) -> Self {
        Self {
            id: action.id.clone(),
            name: action.tool.clone(),
            arguments: action.args_value(),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<DeclaredToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl HistoryEntry {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant entry declaring a single tool call (content is always null).
    pub fn assistant_tool_call(action: &ToolCallAction) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: vec![DeclaredToolCall::from(action)],
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// Content as a string slice, empty when null.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    fn has_text(&self) -> bool {
        !self.text().trim().is_empty()
    }
}

/// Repair a history so it satisfies provider wire-format rules.
///
/// - assistant entries with tool calls get `content = None`
/// - assistant entries with no tool calls and no text are dropped
/// - tool entries must answer a call declared earlier; orphans and duplicate
///   answers are dropped
/// - declared calls that never receive an answer are removed from their
///   assistant entry
pub fn sanitize(history: &[HistoryEntry]) -> Vec<HistoryEntry> {
    // (entry index, call index, id) for every declaration seen so far;
    // a result answers the nearest earlier one with its id still open.
    let mut declared: Vec<(usize, usize, &str)> = Vec::new();
    let mut answered: HashSet<(usize, usize)> = HashSet::new();
    let mut kept: Vec<usize> = Vec::with_capacity(history.len());

    for (index, entry) in history.iter().enumerate() {
        match entry.role {
            Role::Assistant => {
                for (slot, call) in entry.tool_calls.iter().enumerate() {
                    declared.push((index, slot, call.id.as_str()));
                }
                kept.push(index);
            }
            Role::Tool => {
                let id = entry.tool_call_id.as_deref().unwrap_or("");
                let mut seen = false;
                let mut open = None;
                for &(entry_index, slot, declared_id) in declared.iter().rev() {
                    if id.is_empty() || declared_id != id {
                        continue;
                    }
                    seen = true;
                    if !answered.contains(&(entry_index, slot)) {
                        open = Some((entry_index, slot));
                        break;
                    }
                }
                match open {
                    Some(key) => {
                        answered.insert(key);
                        kept.push(index);
                    }
                    None if seen => warn!(tool_call_id = id, "dropping duplicate tool result"),
                    None => warn!(tool_call_id = id, "dropping orphaned tool result"),
                }
            }
            Role::User | Role::System => kept.push(index),
        }
    }

    let mut out = Vec::with_capacity(kept.len());
    for index in kept {
        let entry = &history[index];
        if entry.role != Role::Assistant {
            out.push(entry.clone());
            continue;
        }

        let calls: Vec<DeclaredToolCall> = entry
            .tool_calls
            .iter()
            .enumerate()
            .filter(|(slot, call)| {
                let ok = answered.contains(&(index, *slot));
                if !ok {
                    warn!(tool_call_id = %call.id, tool = %call.name, "removing unanswered tool call");
                }
                ok
            })
            .map(|(_, call)| call.clone())
            .collect();

        if !calls.is_empty() {
            out.push(HistoryEntry {
                role: Role::Assistant,
                content: None,
                tool_calls: calls,
                tool_call_id: None,
                name: entry.name.clone(),
            });
        } else if entry.has_text() {
            out.push(HistoryEntry {
                tool_calls: Vec::new(),
                ..entry.clone()
            });
        } else {
            warn!("dropping empty assistant entry");
        }
    }

    out
}

/// Check the sanitizer invariants without repairing anything.
pub fn is_well_formed(history: &[HistoryEntry]) -> bool {
    let mut declared: HashSet<&str> = HashSet::new();
    for entry in history {
        match entry.role {
            Role::Assistant if entry.tool_calls.is_empty() => {
                if !entry.has_text() {
                    return false;
                }
            }
            Role::Assistant => {
                if entry.content.is_some() {
                    return false;
                }
                declared.extend(entry.tool_calls.iter().map(|c| c.id.as_str()));
            }
            Role::Tool => match entry.tool_call_id.as_deref() {
                Some(id) if declared.contains(id) => {}
                _ => return false,
            },
            Role::User | Role::System => {}
        }
    }
    true
}
