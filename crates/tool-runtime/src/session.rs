//! Per-session context handed to the executor at call time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::citations::Citation;
use crate::consent::ConsentGate;
use crate::policy::PolicyRegistry;

/// Side effects published to the chat UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiNotification {
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    Citations {
        tool_call_id: String,
        citations: Vec<Citation>,
    },
    /// `Some(tool)` while a tool runs, `None` once it is done.
    ExecutingTool { name: Option<String> },
}

/// Write-only sink for UI side effects.
pub trait UiSink: Send + Sync {
    fn notify(&self, session_id: &str, notification: UiNotification);
}

/// Discards every notification.
pub struct NoopSink;

impl UiSink for NoopSink {
    fn notify(&self, _session_id: &str, _notification: UiNotification) {}
}

#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub policies: Arc<PolicyRegistry>,
    pub consent: Arc<ConsentGate>,
    pub sink: Arc<dyn UiSink>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        policies: Arc<PolicyRegistry>,
        consent: Arc<ConsentGate>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            policies,
            consent,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UiSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register tools discovered from a connected integration at session start.
    /// Safe to call again with the same tools.
    pub fn register_integration_tools<I, S>(&self, integration_id: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            self.policies.register_integration_tools(integration_id, [name]);
            self.consent.catalog().register_tool(name, integration_id);
        }
    }

    pub(crate) fn notify(&self, notification: UiNotification) {
        self.sink.notify(&self.session_id, notification);
    }
}

/// Sink that keeps every notification, for assertions in tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod recording {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        notifications: Mutex<Vec<UiNotification>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn notifications(&self) -> Vec<UiNotification> {
            self.notifications.lock().unwrap().clone()
        }
    }

    impl UiSink for RecordingSink {
        fn notify(&self, _session_id: &str, notification: UiNotification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::{IntegrationCatalog, IntegrationStore, InMemoryIntegrationStore};
    use crate::policy::ToolKind;

    fn session() -> SessionContext {
        let (store, _requests) = InMemoryIntegrationStore::new();
        let gate = ConsentGate::new(
            Arc::new(IntegrationCatalog::builtin()),
            Arc::new(store) as Arc<dyn IntegrationStore>,
        );
        SessionContext::new(
            "s1",
            Arc::new(PolicyRegistry::with_builtin_policies()),
            Arc::new(gate),
        )
    }

    #[test]
    fn test_integration_tools_get_policy_and_owner() {
        let session = session();
        // no gmail_ prefix, so only explicit registration links it
        session.register_integration_tools("gmail", ["send_mail"]);

        assert_eq!(session.consent.integration_for("send_mail").as_deref(), Some("gmail"));
        let policy = session.policies.get_policy("send_mail");
        assert_eq!(policy.kind, ToolKind::Execution);
        assert!(!session.policies.requires_chaining("send_mail"));
    }

    #[test]
    fn test_repeated_registration_is_idempotent() {
        let session = session();
        let tools = vec!["send_mail".to_string(), "list_labels".to_string()];
        session.register_integration_tools("gmail", &tools);
        session.register_integration_tools("gmail", &tools);

        assert_eq!(session.consent.integration_for("list_labels").as_deref(), Some("gmail"));
        assert_eq!(session.policies.get_policy("send_mail").kind, ToolKind::Execution);
    }
}
