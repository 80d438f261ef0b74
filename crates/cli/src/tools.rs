//! Tools the terminal chat registers by default.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use parley_tool_runtime::policy::{DISCOVER_INTEGRATIONS, GET_INTEGRATION_DETAILS};
use parley_tool_runtime::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};
use parley_tool_runtime::ToolRegistry;

use crate::config::CliConfig;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_current_time".to_string(),
            description: "Current date and time, in UTC or at a fixed UTC offset.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "utc_offset_hours": {
                        "type": "integer",
                        "description": "Offset from UTC in hours, e.g. 2 or -5"
                    }
                }
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolOutput, ToolError> {
        let now = Utc::now();
        let Some(offset) = input.get("utc_offset_hours") else {
            return Ok(ToolOutput::json(&json!({ "utc": now.to_rfc3339() })));
        };
        let hours = offset
            .as_i64()
            .ok_or_else(|| ToolError::InvalidInput("utc_offset_hours must be an integer".into()))?;
        let zone = hours
            .checked_mul(3600)
            .and_then(|seconds| i32::try_from(seconds).ok())
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::InvalidInput(format!("offset out of range: {}", hours)))?;
        Ok(ToolOutput::json(&json!({
            "utc": now.to_rfc3339(),
            "local": now.with_timezone(&zone).to_rfc3339(),
        })))
    }
}

/// Lists connected integrations with their capability categories.
pub struct DiscoverIntegrationsTool {
    integrations: Vec<(String, Vec<String>)>,
}

impl DiscoverIntegrationsTool {
    pub fn new(integrations: Vec<(String, Vec<String>)>) -> Self {
        Self { integrations }
    }
}

#[async_trait]
impl Tool for DiscoverIntegrationsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: DISCOVER_INTEGRATIONS.to_string(),
            description: "List the user's connected integrations and what each can do.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<ToolOutput, ToolError> {
        let servers: Map<String, Value> = self
            .integrations
            .iter()
            .map(|(id, categories)| {
                (
                    id.clone(),
                    json!({"detail_level": "categories_only", "details": categories}),
                )
            })
            .collect();
        Ok(ToolOutput::json(&json!({ "servers": servers })))
    }
}

/// Expands categories named by discovery into per-category detail.
pub struct IntegrationDetailsTool {
    integrations: Vec<(String, Vec<String>)>,
}

impl IntegrationDetailsTool {
    pub fn new(integrations: Vec<(String, Vec<String>)>) -> Self {
        Self { integrations }
    }
}

#[async_trait]
impl Tool for IntegrationDetailsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: GET_INTEGRATION_DETAILS.to_string(),
            description: "Details for capability categories returned by discover_integrations."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category_names": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["category_names"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolOutput, ToolError> {
        let names = input
            .get("category_names")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidInput("missing 'category_names' array".into()))?;

        let categories: Vec<Value> = names
            .iter()
            .filter_map(Value::as_str)
            .map(|name| {
                let owners: Vec<&str> = self
                    .integrations
                    .iter()
                    .filter(|(_, cats)| cats.iter().any(|c| c == name))
                    .map(|(id, _)| id.as_str())
                    .collect();
                json!({"name": name, "integrations": owners, "available": !owners.is_empty()})
            })
            .collect();
        Ok(ToolOutput::json(&json!({ "categories": categories })))
    }
}

pub fn default_registry(config: &CliConfig) -> Result<ToolRegistry> {
    let integrations = config.connected_categories();
    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool)?;
    registry.register_arc(Arc::new(DiscoverIntegrationsTool::new(integrations.clone())))?;
    registry.register_arc(Arc::new(IntegrationDetailsTool::new(integrations)))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_tool_runtime::planner::extract_category_names;

    fn integrations() -> Vec<(String, Vec<String>)> {
        vec![
            ("gmail".into(), vec!["email".into(), "labels".into()]),
            ("notion".into(), vec!["pages".into()]),
        ]
    }

    #[tokio::test]
    async fn test_discovery_envelope_feeds_chaining() {
        let tool = DiscoverIntegrationsTool::new(integrations());
        let out = tool.execute(json!({}), &ToolContext::default()).await.unwrap();
        assert_eq!(
            extract_category_names(&out.as_json().unwrap()),
            vec!["email", "labels", "pages"]
        );
    }

    #[tokio::test]
    async fn test_details_for_categories() {
        let tool = IntegrationDetailsTool::new(integrations());
        let out = tool
            .execute(json!({"category_names": ["pages", "calendar"]}), &ToolContext::default())
            .await
            .unwrap();
        let body = out.as_json().unwrap();
        assert_eq!(body["categories"][0]["integrations"], json!(["notion"]));
        assert_eq!(body["categories"][1]["available"], false);

        let err = tool.execute(json!({}), &ToolContext::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_current_time_offset() {
        let ctx = ToolContext::default();
        let utc = CurrentTimeTool.execute(json!({}), &ctx).await.unwrap();
        assert!(utc.as_json().unwrap().get("local").is_none());

        let local = CurrentTimeTool
            .execute(json!({"utc_offset_hours": -5}), &ctx)
            .await
            .unwrap();
        assert!(local.as_json().unwrap()["local"].as_str().unwrap().ends_with("-05:00"));

        let bad = CurrentTimeTool.execute(json!({"utc_offset_hours": 99}), &ctx).await;
        assert!(matches!(bad, Err(ToolError::InvalidInput(_))));

        let huge = CurrentTimeTool
            .execute(json!({"utc_offset_hours": i64::MAX}), &ctx)
            .await;
        assert!(matches!(huge, Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_default_registry() {
        let registry = default_registry(&CliConfig::default()).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["discover_integrations", "get_current_time", "get_integration_details"]);
    }
}
