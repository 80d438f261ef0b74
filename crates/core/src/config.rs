use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub llm: LlmConfig,
    pub runtime: RuntimeConfig,
    pub liveness: LivenessConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GROQ_API_KEY",
    "OPENROUTER_API_KEY",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PARLEY_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PARLEY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            llm: LlmConfig::from_env_profiled(p),
            runtime: RuntimeConfig::from_env_profiled(p),
            liveness: LivenessConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  llm:       fallback={}, providers=[{}]",
            self.llm.fallback_provider,
            self.llm.configured_providers().join(", ")
        );
        tracing::info!("  runtime:   max_tool_depth={}", self.runtime.max_tool_depth);
        tracing::info!("  liveness:  ttl_hours={}", self.liveness.ttl_hours);
    }

    /// Return a redacted view safe to print (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "llm": {
                "fallback_provider": self.llm.fallback_provider,
                "configured": self.llm.configured_providers(),
                "anthropic_model": self.llm.anthropic_model,
                "openai_model": self.llm.openai_model,
                "openai_base_url": self.llm.openai_base_url,
                "ollama_url": self.llm.ollama_url,
                "temperature": self.llm.temperature,
                "max_tokens": self.llm.max_tokens,
            },
            "runtime": {
                "max_tool_depth": self.runtime.max_tool_depth,
                "system_prompt": self.runtime.system_prompt.is_some(),
            },
            "liveness": {
                "ttl_hours": self.liveness.ttl_hours,
                "probe_max_tokens": self.liveness.probe_max_tokens,
            },
        })
    }
}

// ── LLM providers ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider used when a model id matches no known family.
    pub fallback_provider: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub anthropic_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    pub groq_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    /// Set to enable a local Ollama server through its OpenAI-compatible API.
    pub ollama_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            fallback_provider: profiled_env_or(p, "LLM_PROVIDER", "anthropic"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_base_url: profiled_env_opt(p, "ANTHROPIC_BASE_URL"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o"),
            groq_api_key: profiled_env_opt(p, "GROQ_API_KEY"),
            openrouter_api_key: profiled_env_opt(p, "OPENROUTER_API_KEY"),
            ollama_url: profiled_env_opt(p, "OLLAMA_URL"),
            temperature: profiled_env_parse(p, "LLM_TEMPERATURE", 0.0),
            max_tokens: profiled_env_parse(p, "LLM_MAX_TOKENS", 4096),
        }
    }

    /// Names of providers that have credentials (or, for Ollama, a URL).
    pub fn configured_providers(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.anthropic_api_key.is_some() {
            names.push("anthropic");
        }
        if self.openai_api_key.is_some() {
            names.push("openai");
        }
        if self.groq_api_key.is_some() {
            names.push("groq");
        }
        if self.openrouter_api_key.is_some() {
            names.push("openrouter");
        }
        if self.ollama_url.is_some() {
            names.push("ollama");
        }
        names
    }

    pub fn is_configured(&self) -> bool {
        !self.configured_providers().is_empty()
    }

    /// Default model for a provider name.
    pub fn default_model(&self, provider: &str) -> &str {
        match provider {
            "openai" => &self.openai_model,
            "groq" => "llama-3.3-70b-versatile",
            "openrouter" => "openrouter/auto",
            "ollama" => "llama3.2",
            _ => &self.anthropic_model,
        }
    }
}

// ── Runtime ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model re-invocations allowed after tool calls in one turn.
    pub max_tool_depth: usize,
    pub system_prompt: Option<String>,
}

impl RuntimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_tool_depth: profiled_env_parse(p, "MAX_TOOL_DEPTH", 5),
            system_prompt: profiled_env_opt(p, "SYSTEM_PROMPT"),
        }
    }
}

// ── Model liveness ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// How long a probe result stays fresh.
    pub ttl_hours: u64,
    /// Output budget for a probe request.
    pub probe_max_tokens: u32,
}

impl LivenessConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            ttl_hours: profiled_env_parse(p, "LIVENESS_TTL_HOURS", 12),
            probe_max_tokens: profiled_env_parse(p, "LIVENESS_PROBE_MAX_TOKENS", 1),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 12,
            probe_max_tokens: 1,
        }
    }
}
