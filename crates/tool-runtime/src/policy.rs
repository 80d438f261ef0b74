use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the runtime treats a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Lists what is available; usually followed by a detail fetch.
    Discovery,
    /// Does something on the user's behalf.
    Execution,
    /// Side-effect free helpers (time, formatting).
    Utility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub name: String,
    pub kind: ToolKind,
    pub requires_chaining: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_to: Option<String>,
}

impl ToolPolicy {
    pub fn execution(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ToolKind::Execution,
            requires_chaining: false,
            chain_to: None,
        }
    }

    pub fn utility(name: impl Into<String>) -> Self {
        Self {
            kind: ToolKind::Utility,
            ..Self::execution(name)
        }
    }

    pub fn discovery(name: impl Into<String>, chain_to: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind: ToolKind::Discovery,
            requires_chaining: chain_to.is_some(),
            chain_to: chain_to.map(String::from),
        }
    }
}

/// Discovery tool that lists integration capabilities by category.
pub const DISCOVER_INTEGRATIONS: &str = "discover_integrations";
/// Detail fetch chained after [`DISCOVER_INTEGRATIONS`].
pub const GET_INTEGRATION_DETAILS: &str = "get_integration_details";

/// Session-scoped classification of tool names.
///
/// Unknown tools fall back to `execution` without chaining.
/// Registration is an idempotent upsert.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: DashMap<String, ToolPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in tools.
    pub fn with_builtin_policies() -> Self {
        let registry = Self::new();
        for policy in [
            ToolPolicy::discovery(DISCOVER_INTEGRATIONS, Some(GET_INTEGRATION_DETAILS)),
            ToolPolicy::discovery(GET_INTEGRATION_DETAILS, None),
            ToolPolicy::execution("web_search"),
            ToolPolicy::execution("get_weather"),
            ToolPolicy::execution("get_stock_price"),
            ToolPolicy::utility("get_current_time"),
        ] {
            registry.register_policy(policy);
        }
        registry
    }

    pub fn register_policy(&self, policy: ToolPolicy) {
        debug!(tool = %policy.name, kind = ?policy.kind, "registering tool policy");
        self.policies.insert(policy.name.clone(), policy);
    }

    /// Register execution policies for tools loaded from a connected integration.
    pub fn register_integration_tools<I, S>(&self, integration_id: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            // keep a richer policy if one is already registered
            if self.policies.contains_key(&name) {
                continue;
            }
            debug!(integration = integration_id, tool = %name, "registering integration tool");
            self.register_policy(ToolPolicy::execution(name));
        }
    }

    pub fn get_policy(&self, name: &str) -> ToolPolicy {
        self.policies
            .get(name)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| ToolPolicy::execution(name))
    }

    pub fn requires_chaining(&self, name: &str) -> bool {
        self.policies
            .get(name)
            .is_some_and(|p| p.requires_chaining)
    }

    pub fn get_chain_target(&self, name: &str) -> Option<String> {
        self.policies.get(name).and_then(|p| p.chain_to.clone())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_defaults_to_execution() {
        let registry = PolicyRegistry::new();
        let policy = registry.get_policy("mystery_tool");
        assert_eq!(policy.kind, ToolKind::Execution);
        assert!(!policy.requires_chaining);
        assert!(!registry.requires_chaining("mystery_tool"));
        assert!(registry.get_chain_target("mystery_tool").is_none());
    }

    #[test]
    fn test_builtin_discovery_chain() {
        let registry = PolicyRegistry::with_builtin_policies();
        assert!(registry.requires_chaining(DISCOVER_INTEGRATIONS));
        assert_eq!(
            registry.get_chain_target(DISCOVER_INTEGRATIONS).as_deref(),
            Some(GET_INTEGRATION_DETAILS)
        );
        assert!(!registry.requires_chaining(GET_INTEGRATION_DETAILS));
        assert_eq!(registry.get_policy("get_current_time").kind, ToolKind::Utility);
    }

    #[test]
    fn test_register_is_idempotent_upsert() {
        let registry = PolicyRegistry::new();
        registry.register_policy(ToolPolicy::execution("notion_search"));
        registry.register_policy(ToolPolicy::execution("notion_search"));
        assert_eq!(registry.len(), 1);

        registry.register_policy(ToolPolicy::discovery("notion_search", Some("notion_fetch")));
        assert_eq!(registry.len(), 1);
        assert!(registry.requires_chaining("notion_search"));
    }

    #[test]
    fn test_integration_tools_do_not_clobber_existing() {
        let registry = PolicyRegistry::with_builtin_policies();
        let before = registry.len();
        registry.register_integration_tools("gmail", ["gmail_send_email", "gmail_search"]);
        registry.register_integration_tools("gmail", ["gmail_send_email", "gmail_search"]);
        registry.register_integration_tools("meta", [DISCOVER_INTEGRATIONS]);

        assert_eq!(registry.len(), before + 2);
        assert!(registry.requires_chaining(DISCOVER_INTEGRATIONS));
    }
}
