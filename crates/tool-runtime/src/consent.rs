//! Consent gate for tools that act on a user's connected third-party account.
//!
//! `connected` is a durable fact about the user; `enabled` is a per-session
//! opt-in. The first call into a connected but not enabled integration
//! suspends on [`IntegrationStore::request_consent`] until the UI answers.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A third-party integration and the tool-name prefixes that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub display_name: String,
    pub prefixes: Vec<String>,
}

impl Integration {
    pub fn new(id: &str, display_name: &str, prefixes: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Maps tool names to integrations.
///
/// Explicit registrations win over prefix patterns.
#[derive(Debug, Default)]
pub struct IntegrationCatalog {
    integrations: Vec<Integration>,
    tools: DashMap<String, String>,
}

impl IntegrationCatalog {
    pub fn new(integrations: Vec<Integration>) -> Self {
        Self {
            integrations,
            tools: DashMap::new(),
        }
    }

    /// Catalog with the integrations the chat app ships with.
    pub fn builtin() -> Self {
        Self::new(vec![
            Integration::new("gmail", "Gmail", &["gmail_"]),
            Integration::new("google_calendar", "Google Calendar", &["google_calendar_", "gcal_"]),
            Integration::new("google_drive", "Google Drive", &["google_drive_", "gdrive_"]),
            Integration::new("github", "GitHub", &["github_"]),
            Integration::new("slack", "Slack", &["slack_"]),
            Integration::new("notion", "Notion", &["notion_"]),
        ])
    }

    /// Attach a dynamically loaded tool to an integration.
    pub fn register_tool(&self, tool: &str, integration_id: &str) {
        self.tools.insert(tool.to_string(), integration_id.to_string());
    }

    pub fn get(&self, integration_id: &str) -> Option<&Integration> {
        self.integrations.iter().find(|i| i.id == integration_id)
    }

    /// Integration a tool belongs to, if any.
    pub fn match_tool(&self, tool: &str) -> Option<&Integration> {
        if let Some(id) = self.tools.get(tool) {
            if let Some(integration) = self.get(id.value()) {
                return Some(integration);
            }
        }
        self.integrations
            .iter()
            .find(|i| i.prefixes.iter().any(|p| tool.starts_with(p.as_str())))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentState {
    pub connected: bool,
    pub enabled: bool,
}

/// What the UI is asked to confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPrompt {
    pub session_id: String,
    pub integration_id: String,
    pub display_name: String,
    pub tool: String,
}

/// Session/integration store the gate reads and writes.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn consent_state(&self, session_id: &str, integration_id: &str) -> ConsentState;

    async fn set_enabled(&self, session_id: &str, integration_id: &str, enabled: bool);

    /// Ask the user; resolves once they decide.
    async fn request_consent(&self, prompt: ConsentPrompt) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// The tool does not belong to an integration.
    NotRequired,
    Granted,
    NotConnected { message: String },
    Declined { message: String },
}

impl ConsentDecision {
    pub fn allows_execution(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Granted)
    }
}

pub struct ConsentGate {
    catalog: Arc<IntegrationCatalog>,
    store: Arc<dyn IntegrationStore>,
}

impl ConsentGate {
    pub fn new(catalog: Arc<IntegrationCatalog>, store: Arc<dyn IntegrationStore>) -> Self {
        Self { catalog, store }
    }

    pub fn catalog(&self) -> &IntegrationCatalog {
        &self.catalog
    }

    /// Integration id for a tool, if it has one.
    pub fn integration_for(&self, tool: &str) -> Option<String> {
        self.catalog.match_tool(tool).map(|i| i.id.clone())
    }

    pub async fn check(&self, session_id: &str, tool: &str) -> ConsentDecision {
        let Some(integration) = self.catalog.match_tool(tool) else {
            return ConsentDecision::NotRequired;
        };

        let state = self.store.consent_state(session_id, &integration.id).await;
        if !state.connected {
            info!(tool, integration = %integration.id, "integration not connected");
            return ConsentDecision::NotConnected {
                message: connect_instructions(&integration.display_name),
            };
        }
        if state.enabled {
            return ConsentDecision::Granted;
        }

        debug!(tool, integration = %integration.id, "requesting consent");
        let accepted = self
            .store
            .request_consent(ConsentPrompt {
                session_id: session_id.to_string(),
                integration_id: integration.id.clone(),
                display_name: integration.display_name.clone(),
                tool: tool.to_string(),
            })
            .await;

        if accepted {
            self.store
                .set_enabled(session_id, &integration.id, true)
                .await;
            info!(tool, integration = %integration.id, "consent granted");
            ConsentDecision::Granted
        } else {
            info!(tool, integration = %integration.id, "consent declined");
            ConsentDecision::Declined {
                message: decline_message(&integration.display_name),
            }
        }
    }
}

pub fn connect_instructions(display_name: &str) -> String {
    format!(
        "{name} isn't connected yet. Connect your {name} account from the Integrations \
         settings, then ask me again and I'll take care of it.",
        name = display_name
    )
}

pub fn decline_message(display_name: &str) -> String {
    format!(
        "No problem, I won't use {} for this. Let me know if you change your mind.",
        display_name
    )
}

/// A consent request waiting for the UI.
#[derive(Debug)]
pub struct PendingConsent {
    pub prompt: ConsentPrompt,
    reply: oneshot::Sender<bool>,
}

impl PendingConsent {
    pub fn resolve(self, accepted: bool) {
        if self.reply.send(accepted).is_err() {
            warn!(tool = %self.prompt.tool, "consent answered after the turn ended");
        }
    }
}

/// In-process store. Consent requests are published on a channel; the UI
/// side answers each one through [`PendingConsent::resolve`].
pub struct InMemoryIntegrationStore {
    connected: DashSet<String>,
    enabled: DashMap<(String, String), bool>,
    requests: mpsc::UnboundedSender<PendingConsent>,
}

impl InMemoryIntegrationStore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConsent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Self {
            connected: DashSet::new(),
            enabled: DashMap::new(),
            requests: tx,
        };
        (store, rx)
    }

    pub fn connect(&self, integration_id: &str) {
        self.connected.insert(integration_id.to_string());
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn consent_state(&self, session_id: &str, integration_id: &str) -> ConsentState {
        ConsentState {
            connected: self.connected.contains(integration_id),
            enabled: self
                .enabled
                .get(&(session_id.to_string(), integration_id.to_string()))
                .is_some_and(|e| *e.value()),
        }
    }

    async fn set_enabled(&self, session_id: &str, integration_id: &str, enabled: bool) {
        self.enabled
            .insert((session_id.to_string(), integration_id.to_string()), enabled);
    }

    async fn request_consent(&self, prompt: ConsentPrompt) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.requests.send(PendingConsent { prompt, reply }).is_err() {
            warn!("no consent listener, treating as declined");
            return false;
        }
        // a dropped reply counts as a decline
        answer.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (ConsentGate, Arc<InMemoryIntegrationStore>, mpsc::UnboundedReceiver<PendingConsent>) {
        let (store, rx) = InMemoryIntegrationStore::new();
        let store = Arc::new(store);
        let gate = ConsentGate::new(
            Arc::new(IntegrationCatalog::builtin()),
            store.clone() as Arc<dyn IntegrationStore>,
        );
        (gate, store, rx)
    }

    #[test]
    fn test_prefix_matching() {
        let catalog = IntegrationCatalog::builtin();
        assert_eq!(catalog.match_tool("gmail_send_email").unwrap().id, "gmail");
        assert_eq!(catalog.match_tool("gcal_list_events").unwrap().id, "google_calendar");
        assert!(catalog.match_tool("get_weather").is_none());
    }

    #[test]
    fn test_explicit_registration_wins() {
        let catalog = IntegrationCatalog::builtin();
        catalog.register_tool("search_threads", "slack");
        assert_eq!(catalog.match_tool("search_threads").unwrap().id, "slack");
        // unknown integration ids fall back to prefix matching
        catalog.register_tool("gmail_read", "nonexistent");
        assert_eq!(catalog.match_tool("gmail_read").unwrap().id, "gmail");
    }

    #[tokio::test]
    async fn test_non_integration_tool_needs_no_consent() {
        let (gate, _store, _rx) = gate();
        assert_eq!(gate.check("s1", "get_weather").await, ConsentDecision::NotRequired);
    }

    #[tokio::test]
    async fn test_not_connected_short_circuits() {
        let (gate, _store, mut rx) = gate();
        let decision = gate.check("s1", "github_create_issue").await;
        match decision {
            ConsentDecision::NotConnected { message } => assert!(message.contains("GitHub")),
            other => panic!("expected NotConnected, got {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "no prompt for disconnected integrations");
    }

    #[tokio::test]
    async fn test_consent_granted_enables_for_session() {
        let (gate, store, mut rx) = gate();
        store.connect("gmail");

        let responder = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.prompt.integration_id, "gmail");
            pending.resolve(true);
            rx
        });

        assert_eq!(gate.check("s1", "gmail_send_email").await, ConsentDecision::Granted);
        let mut rx = responder.await.unwrap();

        // second call in the same session does not prompt again
        assert_eq!(gate.check("s1", "gmail_search").await, ConsentDecision::Granted);
        assert!(rx.try_recv().is_err());

        // other sessions are unaffected
        let state = store.consent_state("s2", "gmail").await;
        assert!(state.connected && !state.enabled);
    }

    #[tokio::test]
    async fn test_consent_declined() {
        let (gate, store, mut rx) = gate();
        store.connect("gmail");
        tokio::spawn(async move {
            if let Some(pending) = rx.recv().await {
                pending.resolve(false);
            }
        });

        let decision = gate.check("s1", "gmail_send_email").await;
        assert!(matches!(decision, ConsentDecision::Declined { .. }));
        assert!(!decision.allows_execution());
        assert!(!store.consent_state("s1", "gmail").await.enabled);
    }

    #[tokio::test]
    async fn test_missing_listener_declines() {
        let (gate, store, rx) = gate();
        drop(rx);
        store.connect("notion");
        assert!(matches!(
            gate.check("s1", "notion_search").await,
            ConsentDecision::Declined { .. }
        ));
    }
}
