pub mod config;

pub use config::{Config, LivenessConfig, LlmConfig, RuntimeConfig};
