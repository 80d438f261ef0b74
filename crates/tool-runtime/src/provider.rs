use crate::history::HistoryEntry;
use crate::stream::StreamEvent;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Raw provider body: bytes as they come off the wire.
pub type RawStream = Pin<Box<dyn Stream<Item = Result<Bytes, ConnectionError>> + Send>>;

/// Canonical events decoded from a [`RawStream`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ConnectionError>> + Send>>;

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<HistoryEntry>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, messages: Vec<HistoryEntry>) -> Self {
        Self {
            model: model.into(),
            messages,
            system_prompt: None,
            tools: Vec::new(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Connection to one upstream model provider.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the executor), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Open a streaming request against the provider.
    async fn create_stream(&self, request: &ModelRequest) -> Result<RawStream, ConnectionError>;

    /// Decode the provider's wire format into canonical events.
    ///
    /// The returned stream is lazy, finite and cannot be restarted.
    fn process_stream(&self, raw: RawStream) -> EventStream;

    /// Convenience: open and decode in one step.
    async fn stream(&self, request: &ModelRequest) -> Result<EventStream, ConnectionError> {
        let raw = self.create_stream(request).await?;
        Ok(self.process_stream(raw))
    }

    /// Provider name for logging/debugging (e.g., "anthropic", "openai")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    Auth,
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Scripted adapter for testing the executor without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Scripted {
        Events(Vec<StreamEvent>),
        /// Events followed by a mid-stream failure.
        Broken(Vec<StreamEvent>, String),
        /// `create_stream` itself fails.
        Refused(String),
    }

    /// Replays queued responses in FIFO order and records every request.
    ///
    /// Responses travel through the raw byte layer as JSON lines so the
    /// create/process split is exercised like a real adapter.
    pub struct ScriptedAdapter {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedAdapter {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Queue a response that will be returned after all earlier ones.
        pub fn queue_response(&self, events: Vec<StreamEvent>) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Scripted::Events(events));
        }

        /// Queue a simple text response.
        pub fn queue_text(&self, text: &str) {
            self.queue_response(vec![StreamEvent::text(text)]);
        }

        /// Queue a response that breaks after emitting `events`.
        pub fn queue_broken(&self, events: Vec<StreamEvent>, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Scripted::Broken(events, message.to_string()));
        }

        /// Queue a connection that fails before streaming.
        pub fn queue_refusal(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Scripted::Refused(message.to_string()));
        }

        /// Every request received so far.
        pub fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Default for ScriptedAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    fn encode(event: &StreamEvent) -> Result<Bytes, ConnectionError> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| ConnectionError::InvalidResponse(e.to_string()))?;
        line.push('\n');
        Ok(Bytes::from(line))
    }

    #[async_trait]
    impl ConnectionAdapter for ScriptedAdapter {
        async fn create_stream(&self, request: &ModelRequest) -> Result<RawStream, ConnectionError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Scripted::Events(Vec::new()));

            let chunks: Vec<Result<Bytes, ConnectionError>> = match next {
                Scripted::Refused(message) => return Err(ConnectionError::Network(message)),
                Scripted::Events(events) => events.iter().map(encode).collect(),
                Scripted::Broken(events, message) => {
                    let mut chunks: Vec<_> = events.iter().map(encode).collect();
                    chunks.push(Err(ConnectionError::Stream(message)));
                    chunks
                }
            };
            Ok(Box::pin(stream::iter(chunks)))
        }

        fn process_stream(&self, raw: RawStream) -> EventStream {
            use futures::StreamExt;
            Box::pin(raw.map(|chunk| {
                let bytes = chunk?;
                serde_json::from_slice::<StreamEvent>(bytes.trim_ascii_end())
                    .map_err(|e| ConnectionError::InvalidResponse(e.to_string()))
            }))
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }
}
