use async_trait::async_trait;
use parley_tool_runtime::provider::ConnectionError;
use serde::{Deserialize, Serialize};

/// A model as the provider's listing endpoint reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Only some providers (OpenRouter, Groq) report this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

impl ListedModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            context_window: None,
        }
    }
}

/// Model discovery and liveness probing for one provider account.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Provider key used in liveness cache keys (e.g. "anthropic").
    fn provider(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<ListedModel>, ConnectionError>;

    /// Smallest possible request against `model`. `Ok` means the key can
    /// currently use it.
    async fn probe(&self, model: &str, max_tokens: u32) -> Result<(), ConnectionError>;
}
