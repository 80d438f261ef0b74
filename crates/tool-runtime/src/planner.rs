//! Decides whether a tool call runs alone or is chained into a follow-up,
//! and derives the follow-up's arguments from the first result.

use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{Action, PlanAction, ToolCallAction};
use crate::normalizer::synthesize_call_id;
use crate::policy::PolicyRegistry;

/// Argument key the chained detail tool expects.
pub const CATEGORY_NAMES_ARG: &str = "category_names";

const CATEGORIES_ONLY: &str = "categories_only";

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    Execute(ToolCallAction),
    /// The original call followed by a placeholder for the chain target.
    Chain(Vec<ToolCallAction>),
    Noop,
}

impl ExecutionPlan {
    /// Same plan in the generic action vocabulary.
    pub fn into_action(self) -> Option<Action> {
        match self {
            Self::Execute(action) => Some(Action::ToolCall(action)),
            Self::Chain(actions) => Some(Action::Plan(PlanAction {
                steps: actions.into_iter().map(Action::ToolCall).collect(),
            })),
            Self::Noop => None,
        }
    }
}

pub struct Planner<'a> {
    policies: &'a PolicyRegistry,
}

impl<'a> Planner<'a> {
    pub fn new(policies: &'a PolicyRegistry) -> Self {
        Self { policies }
    }

    pub fn plan(&self, action: ToolCallAction) -> ExecutionPlan {
        if !self.policies.requires_chaining(&action.tool) {
            return ExecutionPlan::Execute(action);
        }
        match self.policies.get_chain_target(&action.tool) {
            Some(target) => {
                debug!(tool = %action.tool, chain_to = %target, "planning chained call");
                let placeholder = ToolCallAction::new(target, Map::new(), synthesize_call_id());
                ExecutionPlan::Chain(vec![action, placeholder])
            }
            None => ExecutionPlan::Execute(action),
        }
    }
}

/// Install the category names found in a discovery result as the chained
/// action's arguments.
///
/// Returns the action with empty args when nothing is extractable.
pub fn prepare_chained_args(previous_result: &Value, mut chained: ToolCallAction) -> ToolCallAction {
    let names = extract_category_names(previous_result);
    chained.args = Map::new();
    if !names.is_empty() {
        chained.args.insert(
            CATEGORY_NAMES_ARG.to_string(),
            Value::Array(names.into_iter().map(Value::String).collect()),
        );
    }
    chained
}

/// Category names across all groups of a `{servers: {...}}` discovery
/// envelope, in order, duplicates kept. Accepts the envelope as a JSON string.
pub fn extract_category_names(result: &Value) -> Vec<String> {
    let parsed;
    let envelope = match result {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => return Vec::new(),
        },
        other => other,
    };

    let Some(groups) = envelope.get("servers").and_then(Value::as_object) else {
        return Vec::new();
    };

    groups
        .values()
        .filter(|group| {
            group
                .get("detail_level")
                .and_then(Value::as_str)
                .map_or(true, |level| level == CATEGORIES_ONLY)
        })
        .filter_map(|group| group.get("details").and_then(Value::as_array))
        .flat_map(|details| details.iter().filter_map(Value::as_str).map(String::from))
        .collect()
}
