//! Anthropic Messages API adapter.
//!
//! Streams `/v1/messages` over SSE and translates typed content blocks into
//! canonical [`StreamEvent`](parley_tool_runtime::stream::StreamEvent)s.

mod sse;
mod streaming;
mod translate;

pub use self::streaming::{AnthropicAdapter, DEFAULT_BASE_URL};
