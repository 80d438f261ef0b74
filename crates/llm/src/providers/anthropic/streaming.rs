//! [`ConnectionAdapter`] and [`ModelCatalog`] for the Anthropic Messages API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use parley_tool_runtime::provider::{
    ConnectionAdapter, ConnectionError, EventStream, ModelRequest, RawStream,
};

use super::sse::MessageStream;
use super::translate::{probe_body, request_body};
use crate::catalog::{ListedModel, ModelCatalog};
use crate::providers::http::{check_response, network};
use crate::providers::sse::{body_stream, decode};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic adapter. The model comes from each [`ModelRequest`], so one
/// instance serves every Claude model the key can reach.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a proxy or test server (no trailing `/v1`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }
}

#[async_trait]
impl ConnectionAdapter for AnthropicAdapter {
    async fn create_stream(&self, request: &ModelRequest) -> Result<RawStream, ConnectionError> {
        let body = request_body(request);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting Anthropic streaming request"
        );

        let response = self
            .request(reqwest::Method::POST, "/v1/messages")
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let response = check_response(response).await?;
        Ok(body_stream(response))
    }

    fn process_stream(&self, raw: RawStream) -> EventStream {
        Box::pin(decode(raw, MessageStream::default()))
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[async_trait]
impl ModelCatalog for AnthropicAdapter {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn list_models(&self) -> Result<Vec<ListedModel>, ConnectionError> {
        let response = self
            .request(reqwest::Method::GET, "/v1/models?limit=1000")
            .send()
            .await
            .map_err(network)?;
        let list: ModelList = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ConnectionError::InvalidResponse(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ListedModel {
                id: m.id,
                display_name: m.display_name,
                context_window: None,
            })
            .collect())
    }

    async fn probe(&self, model: &str, max_tokens: u32) -> Result<(), ConnectionError> {
        let response = self
            .request(reqwest::Method::POST, "/v1/messages")
            .json(&probe_body(model, max_tokens))
            .send()
            .await
            .map_err(network)?;
        check_response(response).await.map(|_| ())
    }
}
