pub mod accumulator;
pub mod action;
pub mod citations;
pub mod consent;
pub mod executor;
pub mod history;
pub mod normalizer;
pub mod planner;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod session;
pub mod stream;
pub mod tool;

pub use accumulator::{RawArguments, ToolCallAccumulator, ToolCallBuffer};
pub use action::{Action, ErrorAction, MessageAction, PlanAction, ToolCallAction};
pub use citations::{extract_citations, Citation};
pub use consent::{
    ConsentDecision, ConsentGate, ConsentPrompt, ConsentState, InMemoryIntegrationStore,
    Integration, IntegrationCatalog, IntegrationStore, PendingConsent,
};
pub use executor::{ChatStream, ToolExecutor, DEFAULT_MAX_DEPTH};
pub use history::{sanitize, HistoryEntry, Role};
pub use normalizer::normalize_tool_call;
pub use planner::{ExecutionPlan, Planner};
pub use policy::{PolicyRegistry, ToolKind, ToolPolicy};
pub use provider::{ConnectionAdapter, ConnectionError, EventStream, ModelRequest, RawStream};
pub use registry::ToolRegistry;
pub use session::{NoopSink, SessionContext, UiNotification, UiSink};
pub use stream::{ChatEvent, StreamEvent, ToolCallChunk, UsageStats};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};
