//! Concrete model providers and model selection.

pub mod catalog;
pub mod liveness;
pub mod providers;

pub use catalog::{ListedModel, ModelCatalog};
pub use liveness::{
    classify_probe_error, route, LivenessEntry, ModelLivenessRegistry, ProbeErrorKind,
    SnapshotError, TaskRequirements, UnifiedModel,
};
pub use providers::anthropic::AnthropicAdapter;
pub use providers::openai::OpenAiCompatibleAdapter;
pub use providers::{family_for_model, AdapterRegistry, ResolvedModel};
