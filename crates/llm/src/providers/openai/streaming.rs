//! [`ConnectionAdapter`] and [`ModelCatalog`] for OpenAI-compatible servers.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use parley_tool_runtime::provider::{
    ConnectionAdapter, ConnectionError, EventStream, ModelRequest, RawStream,
};

use super::sse::CompletionStream;
use super::translate::{probe_body, request_body, Dialect};
use crate::catalog::{ListedModel, ModelCatalog};
use crate::providers::http::{check_response, network};
use crate::providers::sse::{body_stream, decode};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Adapter for `/chat/completions` streaming. Base URLs include the API
/// version segment (`.../v1`).
pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    dialect: Dialect,
}

impl OpenAiCompatibleAdapter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            dialect: Dialect::Compatible,
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        let mut adapter = Self::new("openai", OPENAI_BASE_URL, Some(api_key.into()));
        adapter.dialect = Dialect::OpenAi;
        adapter
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", GROQ_BASE_URL, Some(api_key.into()))
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL, Some(api_key.into()))
    }

    /// Local Ollama server; `base_url` is the server root, e.g. `http://localhost:11434`.
    pub fn ollama(base_url: Option<&str>) -> Self {
        let base = match base_url {
            Some(url) => format!("{}/v1", url.trim_end_matches('/').trim_end_matches("/v1")),
            None => OLLAMA_BASE_URL.to_string(),
        };
        Self::new("ollama", base, None)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ConnectionAdapter for OpenAiCompatibleAdapter {
    async fn create_stream(&self, request: &ModelRequest) -> Result<RawStream, ConnectionError> {
        let body = request_body(request, self.dialect);
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting chat-completions streaming request"
        );

        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let response = check_response(response).await?;
        Ok(body_stream(response))
    }

    fn process_stream(&self, raw: RawStream) -> EventStream {
        Box::pin(decode(raw, CompletionStream::default()))
    }

    fn provider_name(&self) -> &str {
        &self.name
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
    name: Option<String>,
    /// OpenRouter
    #[serde(default)]
    context_length: Option<u32>,
    /// Groq
    #[serde(default)]
    context_window: Option<u32>,
}

#[async_trait]
impl ModelCatalog for OpenAiCompatibleAdapter {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<ListedModel>, ConnectionError> {
        let response = self
            .request(reqwest::Method::GET, "/models")
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
                display_name: m.name,
                context_window: m.context_length.or(m.context_window),
            })
            .collect())
    }

    async fn probe(&self, model: &str, max_tokens: u32) -> Result<(), ConnectionError> {
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&probe_body(model, max_tokens, self.dialect))
            .send()
            .await
            .map_err(network)?;
        check_response(response).await.map(|_| ())
    }
}
