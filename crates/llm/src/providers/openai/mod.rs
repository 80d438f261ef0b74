//! OpenAI-compatible chat-completions adapter (OpenAI, Groq, OpenRouter, Ollama).

mod sse;
mod streaming;
mod translate;

pub use self::streaming::{
    OpenAiCompatibleAdapter, GROQ_BASE_URL, OLLAMA_BASE_URL, OPENAI_BASE_URL, OPENROUTER_BASE_URL,
};
