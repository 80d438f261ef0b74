//! Which models a configured key can actually use right now.
//!
//! Listing endpoints report every model a provider serves, not the ones an
//! account may call. Each listed model gets a one-token probe whose outcome
//! is cached for `LivenessConfig::ttl_hours` under `provider:model_id`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use parley_core::config::LivenessConfig;
use parley_tool_runtime::provider::ConnectionError;

use crate::catalog::{ListedModel, ModelCatalog};

const PROBE_CONCURRENCY: usize = 4;
const MAX_TTL_HOURS: u64 = 24 * 365;

/// Listing entries that are not chat models.
const NON_CHAT_MARKERS: &[&str] = &[
    "embed",
    "tts",
    "whisper",
    "dall-e",
    "moderation",
    "davinci",
    "babbage",
    "image",
    "transcribe",
    "audio",
    "realtime",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedModel {
    pub id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub context_window: u32,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

impl UnifiedModel {
    pub fn key(&self) -> String {
        cache_key(&self.provider, &self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    InvalidKey,
    NotAllowed,
    NotFound,
    Quota,
    TierRestricted,
    RateLimited,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessEntry {
    pub usable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ProbeErrorKind>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskRequirements {
    pub needs_vision: bool,
    pub needs_tools: bool,
    pub min_context: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid liveness snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn cache_key(provider: &str, model: &str) -> String {
    format!("{}:{}", provider, model)
}

/// Map a listing entry to a [`UnifiedModel`], or `None` for non-chat models.
pub fn normalize_model(provider: &str, listed: &ListedModel) -> Option<UnifiedModel> {
    let id = listed.id.to_ascii_lowercase();
    if NON_CHAT_MARKERS.iter().any(|marker| id.contains(marker)) {
        return None;
    }

    let bare = id.rsplit('/').next().unwrap_or(id.as_str());
    let (default_context, supports_vision) = if bare.starts_with("claude") {
        (200_000, !bare.starts_with("claude-2") && !bare.starts_with("claude-instant"))
    } else if bare.starts_with("gpt-3.5") {
        (16_385, false)
    } else if bare.starts_with("gpt-4.1") {
        (1_047_576, true)
    } else if bare.starts_with("gpt-4o") || bare.starts_with("gpt-5") || is_o_series(bare) {
        (128_000, true)
    } else if bare.starts_with("gpt-4") {
        (8_192, bare.contains("turbo") || bare.contains("vision"))
    } else {
        let vision = ["vision", "-vl", "llava", "gemini", "pixtral"]
            .iter()
            .any(|marker| bare.contains(marker));
        (8_192, vision)
    };

    Some(UnifiedModel {
        id: listed.id.clone(),
        provider: provider.to_string(),
        display_name: listed.display_name.clone(),
        context_window: listed.context_window.unwrap_or(default_context),
        supports_vision,
        supports_tools: true,
        supports_streaming: true,
    })
}

fn is_o_series(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Best-effort bucket for a failed probe.
pub fn classify_probe_error(err: &ConnectionError) -> ProbeErrorKind {
    match err {
        ConnectionError::Auth => return ProbeErrorKind::InvalidKey,
        ConnectionError::RateLimited { .. } => return ProbeErrorKind::RateLimited,
        _ => {}
    }

    let text = err.to_string().to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["invalid api key", "invalid_api_key", "invalid x-api-key", "incorrect api key", "authentication", "unauthorized"]) {
        ProbeErrorKind::InvalidKey
    } else if has(&["quota", "insufficient", "billing", "credit balance"]) {
        ProbeErrorKind::Quota
    } else if has(&["rate limit", "rate_limit", "too many requests"]) {
        ProbeErrorKind::RateLimited
    } else if has(&["tier", "upgrade your plan", "not available on your plan"]) {
        ProbeErrorKind::TierRestricted
    } else if has(&["not found", "not_found", "does not exist", "no such model"])
        || matches!(err, ConnectionError::Api { status: 404, .. })
    {
        ProbeErrorKind::NotFound
    } else if has(&["permission", "not allowed", "forbidden", "access denied", "does not have access"])
        || matches!(err, ConnectionError::Api { status: 403, .. })
    {
        ProbeErrorKind::NotAllowed
    } else {
        ProbeErrorKind::Unknown
    }
}

/// Weighted score of `model` against `requirements`. Missing a required
/// capability costs far more than any context bonus can recover.
pub fn score(model: &UnifiedModel, requirements: &TaskRequirements) -> i64 {
    let mut total = 0i64;
    let mut require = |needed: bool, present: bool| {
        if needed {
            total += if present { 10 } else { -50 };
        }
    };
    require(requirements.needs_vision, model.supports_vision);
    require(requirements.needs_tools, model.supports_tools);
    if let Some(min) = requirements.min_context {
        require(true, model.context_window >= min);
    }
    total + i64::from(model.context_window / 10_000).min(20)
}

/// Highest-scoring model; the earliest one wins a tie.
pub fn route<'a>(models: &'a [UnifiedModel], requirements: &TaskRequirements) -> Option<&'a UnifiedModel> {
    let mut best: Option<(&UnifiedModel, i64)> = None;
    for model in models {
        let candidate = score(model, requirements);
        if best.map_or(true, |(_, top)| candidate > top) {
            best = Some((model, candidate));
        }
    }
    best.map(|(model, _)| model)
}

pub struct ModelLivenessRegistry {
    models: DashMap<String, UnifiedModel>,
    liveness: DashMap<String, LivenessEntry>,
    ttl: Duration,
    probe_max_tokens: u32,
}

impl ModelLivenessRegistry {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            models: DashMap::new(),
            liveness: DashMap::new(),
            ttl: Duration::hours(config.ttl_hours.min(MAX_TTL_HOURS) as i64),
            probe_max_tokens: config.probe_max_tokens,
        }
    }

    fn is_fresh(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.liveness
            .get(key)
            .is_some_and(|entry| now - entry.last_checked < self.ttl)
    }

    /// List `catalog`'s models and probe every one without a fresh entry.
    /// Returns how many of the provider's models are usable.
    pub async fn load_provider(&self, catalog: &dyn ModelCatalog) -> Result<usize, ConnectionError> {
        let provider = catalog.provider().to_string();
        let listed = catalog.list_models().await?;

        let models: Vec<UnifiedModel> = listed
            .iter()
            .filter_map(|m| normalize_model(&provider, m))
            .collect();
        debug!(
            provider = %provider,
            listed = listed.len(),
            chat_models = models.len(),
            "normalized model listing"
        );

        let now = Utc::now();
        let stale: Vec<UnifiedModel> = models
            .iter()
            .filter(|m| !self.is_fresh(&m.key(), now))
            .cloned()
            .collect();
        for model in models {
            self.models.insert(model.key(), model);
        }

        let probed = stale.len();
        let max_tokens = self.probe_max_tokens;
        let outcomes: Vec<(String, LivenessEntry)> = futures::stream::iter(stale)
            .map(|model| async move {
                let entry = match catalog.probe(&model.id, max_tokens).await {
                    Ok(()) => LivenessEntry {
                        usable: true,
                        error_type: None,
                        last_checked: Utc::now(),
                    },
                    Err(e) => {
                        let kind = classify_probe_error(&e);
                        debug!(model = %model.id, error = %e, kind = ?kind, "probe failed");
                        LivenessEntry {
                            usable: false,
                            error_type: Some(kind),
                            last_checked: Utc::now(),
                        }
                    }
                };
                (model.key(), entry)
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect()
            .await;

        for (key, entry) in outcomes {
            if entry.error_type == Some(ProbeErrorKind::InvalidKey) {
                warn!(key = %key, "provider rejected the API key");
            }
            self.liveness.insert(key, entry);
        }

        let prefix = format!("{}:", provider);
        let usable = self
            .liveness
            .iter()
            .filter(|e| e.key().starts_with(&prefix) && e.value().usable)
            .filter(|e| self.models.contains_key(e.key()))
            .count();
        info!(provider = %provider, probed, usable, "provider liveness loaded");
        Ok(usable)
    }

    pub fn liveness(&self, provider: &str, model: &str) -> Option<LivenessEntry> {
        self.liveness.get(&cache_key(provider, model)).map(|e| e.clone())
    }

    /// Known models whose latest probe succeeded, ordered by cache key.
    pub fn usable_models(&self) -> Vec<UnifiedModel> {
        let mut usable: Vec<UnifiedModel> = self
            .models
            .iter()
            .filter(|m| self.liveness.get(m.key()).is_some_and(|e| e.usable))
            .map(|m| m.value().clone())
            .collect();
        usable.sort_by_key(UnifiedModel::key);
        usable
    }

    /// Best usable model for `requirements`.
    pub fn route(&self, requirements: &TaskRequirements) -> Option<UnifiedModel> {
        route(&self.usable_models(), requirements).cloned()
    }

    /// Liveness cache as a JSON object keyed by `provider:model_id`.
    pub fn snapshot(&self) -> Result<String, SnapshotError> {
        let entries: BTreeMap<String, LivenessEntry> = self
            .liveness
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Merge a [`snapshot`](Self::snapshot) into the cache. Returns the
    /// number of entries read; stale ones are re-probed on the next load.
    pub fn restore(&self, json: &str) -> Result<usize, SnapshotError> {
        let entries: BTreeMap<String, LivenessEntry> = serde_json::from_str(json)?;
        let count = entries.len();
        for (key, entry) in entries {
            self.liveness.insert(key, entry);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Catalog whose probes fail for the models named in `failures`.
    struct FakeCatalog {
        name: &'static str,
        listed: Vec<ListedModel>,
        failures: HashMap<&'static str, (u16, &'static str)>,
        probes: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new(name: &'static str, ids: &[&str]) -> Self {
            Self {
                name,
                listed: ids.iter().map(|id| ListedModel::new(*id)).collect(),
                failures: HashMap::new(),
                probes: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, model: &'static str, status: u16, message: &'static str) -> Self {
            self.failures.insert(model, (status, message));
            self
        }

        fn probe_count(&self) -> usize {
            self.probes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelCatalog for FakeCatalog {
        fn provider(&self) -> &str {
            self.name
        }

        async fn list_models(&self) -> Result<Vec<ListedModel>, ConnectionError> {
            Ok(self.listed.clone())
        }

        async fn probe(&self, model: &str, _max_tokens: u32) -> Result<(), ConnectionError> {
            self.probes.lock().unwrap().push(model.to_string());
            match self.failures.get(model) {
                Some((status, message)) => Err(ConnectionError::Api {
                    status: *status,
                    message: message.to_string(),
                }),
                None => Ok(()),
            }
        }
    }

    fn registry() -> ModelLivenessRegistry {
        ModelLivenessRegistry::new(&LivenessConfig::default())
    }

    fn model(id: &str, context_window: u32, vision: bool, tools: bool) -> UnifiedModel {
        UnifiedModel {
            id: id.into(),
            provider: "test".into(),
            display_name: None,
            context_window,
            supports_vision: vision,
            supports_tools: tools,
            supports_streaming: true,
        }
    }

    #[tokio::test]
    async fn test_load_probes_and_caches() {
        let catalog = FakeCatalog::new(
            "anthropic",
            &["claude-sonnet-4-5", "claude-opus-4-1", "claude-3-haiku"],
        )
        .failing("claude-opus-4-1", 403, "permission_error: your key does not have access");
        let registry = registry();

        assert_eq!(registry.load_provider(&catalog).await.unwrap(), 2);
        assert_eq!(catalog.probe_count(), 3);

        let denied = registry.liveness("anthropic", "claude-opus-4-1").unwrap();
        assert!(!denied.usable);
        assert_eq!(denied.error_type, Some(ProbeErrorKind::NotAllowed));

        // fresh entries are not probed again
        assert_eq!(registry.load_provider(&catalog).await.unwrap(), 2);
        assert_eq!(catalog.probe_count(), 3);

        let ids: Vec<String> = registry.usable_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["claude-3-haiku", "claude-sonnet-4-5"]);
    }

    #[tokio::test]
    async fn test_non_chat_models_are_skipped() {
        let catalog = FakeCatalog::new(
            "openai",
            &["gpt-4o", "text-embedding-3-small", "whisper-1", "dall-e-3", "tts-1-hd"],
        );
        let registry = registry();
        assert_eq!(registry.load_provider(&catalog).await.unwrap(), 1);
        assert_eq!(*catalog.probes.lock().unwrap(), vec!["gpt-4o".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_restored_entries_are_reprobed() {
        let registry = registry();
        let stale = Utc::now() - Duration::hours(13);
        let fresh = Utc::now() - Duration::hours(1);
        let snapshot = serde_json::json!({
            "groq:llama-3.3-70b-versatile": {"usable": true, "last_checked": stale},
            "groq:qwen-qwq-32b": {"usable": true, "last_checked": fresh},
        });
        assert_eq!(registry.restore(&snapshot.to_string()).unwrap(), 2);

        let catalog = FakeCatalog::new("groq", &["llama-3.3-70b-versatile", "qwen-qwq-32b"]);
        registry.load_provider(&catalog).await.unwrap();
        assert_eq!(
            *catalog.probes.lock().unwrap(),
            vec!["llama-3.3-70b-versatile".to_string()]
        );
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let catalog = FakeCatalog::new("openai", &["gpt-4o", "gpt-4.1"])
            .failing("gpt-4.1", 429, "insufficient_quota: You exceeded your current quota");
        let registry = registry();
        registry.load_provider(&catalog).await.unwrap();

        let json = registry.snapshot().unwrap();
        assert!(json.contains("\"openai:gpt-4.1\""));
        assert!(json.contains("\"quota\""));

        let other = ModelLivenessRegistry::new(&LivenessConfig::default());
        assert_eq!(other.restore(&json).unwrap(), 2);
        assert_eq!(
            other.liveness("openai", "gpt-4.1"),
            registry.liveness("openai", "gpt-4.1")
        );
        assert!(matches!(other.restore("[1, 2]"), Err(SnapshotError::Json(_))));
    }

    #[test]
    fn test_classification() {
        let api = |status, message: &str| ConnectionError::Api {
            status,
            message: message.to_string(),
        };
        assert_eq!(classify_probe_error(&ConnectionError::Auth), ProbeErrorKind::InvalidKey);
        assert_eq!(
            classify_probe_error(&ConnectionError::RateLimited { retry_after_secs: 5 }),
            ProbeErrorKind::RateLimited
        );
        assert_eq!(
            classify_probe_error(&api(400, "invalid_request_error: Your credit balance is too low")),
            ProbeErrorKind::Quota
        );
        assert_eq!(
            classify_probe_error(&api(404, "not_found_error: model: claude-x")),
            ProbeErrorKind::NotFound
        );
        assert_eq!(
            classify_probe_error(&api(403, "model requires a higher usage tier")),
            ProbeErrorKind::TierRestricted
        );
        assert_eq!(classify_probe_error(&api(403, "nope")), ProbeErrorKind::NotAllowed);
        assert_eq!(classify_probe_error(&api(500, "overloaded")), ProbeErrorKind::Unknown);
        assert_eq!(
            classify_probe_error(&ConnectionError::Network("connection refused".into())),
            ProbeErrorKind::Unknown
        );
    }

    #[test]
    fn test_normalize_heuristics() {
        let claude = normalize_model("anthropic", &ListedModel::new("claude-sonnet-4-5")).unwrap();
        assert!(claude.supports_vision && claude.supports_tools);
        assert_eq!(claude.context_window, 200_000);

        let turbo = normalize_model("openai", &ListedModel::new("gpt-3.5-turbo")).unwrap();
        assert!(!turbo.supports_vision);

        let mut listed = ListedModel::new("meta-llama/llama-3.2-90b-vision-instruct");
        listed.context_window = Some(131_072);
        let llama = normalize_model("openrouter", &listed).unwrap();
        assert!(llama.supports_vision);
        assert_eq!(llama.context_window, 131_072);
        assert_eq!(llama.key(), "openrouter:meta-llama/llama-3.2-90b-vision-instruct");

        assert!(normalize_model("openai", &ListedModel::new("gpt-4o-realtime-preview")).is_none());
    }

    #[test]
    fn test_route_prefers_matching_capabilities() {
        let models = vec![
            model("big-text", 200_000, false, true),
            model("small-vision", 32_000, true, true),
        ];

        let plain = route(&models, &TaskRequirements::default()).unwrap();
        assert_eq!(plain.id, "big-text");

        let vision = TaskRequirements {
            needs_vision: true,
            ..Default::default()
        };
        assert_eq!(route(&models, &vision).unwrap().id, "small-vision");

        let long = TaskRequirements {
            min_context: Some(100_000),
            ..Default::default()
        };
        assert_eq!(route(&models, &long).unwrap().id, "big-text");
        assert!(route(&[], &vision).is_none());
    }

    #[test]
    fn test_route_tie_keeps_first() {
        let models = vec![model("a", 50_000, true, true), model("b", 50_000, true, true)];
        assert_eq!(route(&models, &TaskRequirements::default()).unwrap().id, "a");
    }
}
