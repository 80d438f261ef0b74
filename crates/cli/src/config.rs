use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use parley_core::config::LlmConfig;

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Integrations the user has connected (e.g. "gmail", "github")
    #[serde(default)]
    pub connected_integrations: Vec<String>,

    /// Connected integrations that skip the consent prompt
    #[serde(default)]
    pub auto_enabled_integrations: Vec<String>,

    /// System prompt for chat turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Default model per provider
    #[serde(default)]
    pub default_models: BTreeMap<String, String>,

    /// Capability categories each connected integration reports during discovery
    #[serde(default)]
    pub integration_categories: BTreeMap<String, Vec<String>>,

    /// Tools each integration exposes beyond its name-prefix convention
    #[serde(default)]
    pub integration_tools: BTreeMap<String, Vec<String>>,
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/parley/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("parley");
        Ok(config_dir)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Where `parley models` keeps its liveness snapshot.
    pub fn liveness_cache_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("liveness.json"))
    }

    /// Load config from the given path, or the default path.
    /// A missing file yields the defaults, which are written out for editing.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?;
            return Ok(config);
        }

        debug!(?config_path, "Config file not found, using defaults");
        let config = Self::default();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let toml_str =
            toml::to_string_pretty(&config).context("failed to serialize default config")?;
        std::fs::write(config_path, toml_str).ok();
        Ok(config)
    }

    /// Model for a turn. Priority: cli override > config file > provider default.
    pub fn resolve_model(&self, provider: &str, cli_override: Option<&str>, llm: &LlmConfig) -> String {
        if let Some(model) = cli_override {
            return model.to_string();
        }
        if let Some(model) = self.default_models.get(provider) {
            return model.clone();
        }
        llm.default_model(provider).to_string()
    }

    /// Connected integrations that must still ask before their first use.
    pub fn needs_consent(&self, integration_id: &str) -> bool {
        self.connected_integrations.iter().any(|i| i == integration_id)
            && !self.auto_enabled_integrations.iter().any(|i| i == integration_id)
    }

    /// Categories for every connected integration, in config order.
    pub fn connected_categories(&self) -> Vec<(String, Vec<String>)> {
        self.connected_integrations
            .iter()
            .map(|id| {
                let categories = self.integration_categories.get(id).cloned().unwrap_or_default();
                (id.clone(), categories)
            })
            .collect()
    }

    /// Extra tool names for every connected integration that lists any.
    pub fn connected_tools(&self) -> Vec<(&str, &[String])> {
        self.connected_integrations
            .iter()
            .filter_map(|id| {
                self.integration_tools
                    .get(id)
                    .map(|tools| (id.as_str(), tools.as_slice()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
connected_integrations = ["gmail", "github"]
auto_enabled_integrations = ["github"]
system_prompt = "Answer briefly."

[default_models]
anthropic = "claude-opus-4-1"

[integration_categories]
gmail = ["email", "labels"]

[integration_tools]
gmail = ["send_mail"]
notion = ["create_page"]
"#;

    fn llm() -> LlmConfig {
        LlmConfig {
            fallback_provider: "anthropic".into(),
            anthropic_api_key: None,
            anthropic_base_url: None,
            anthropic_model: "claude-sonnet-4-5-20250929".into(),
            openai_api_key: None,
            openai_base_url: None,
            openai_model: "gpt-4o".into(),
            groq_api_key: None,
            openrouter_api_key: None,
            ollama_url: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(path.exists());

        // written defaults load back unchanged
        assert_eq!(CliConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = CliConfig::load(path.to_str()).unwrap();
        assert_eq!(config.system_prompt.as_deref(), Some("Answer briefly."));
        assert!(config.needs_consent("gmail"));
        assert!(!config.needs_consent("github"));
        assert!(!config.needs_consent("slack"));
        assert_eq!(
            config.connected_categories(),
            vec![
                ("gmail".to_string(), vec!["email".to_string(), "labels".to_string()]),
                ("github".to_string(), Vec::new()),
            ]
        );
        // notion lists tools but is not connected
        assert_eq!(config.connected_tools(), vec![("gmail", &["send_mail".to_string()][..])]);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connected_integrations = gmail").unwrap();
        let err = CliConfig::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse config"));
    }

    #[test]
    fn test_resolve_model_priority() {
        let config: CliConfig = toml::from_str(SAMPLE).unwrap();
        let llm = llm();
        assert_eq!(config.resolve_model("anthropic", Some("claude-3-haiku"), &llm), "claude-3-haiku");
        assert_eq!(config.resolve_model("anthropic", None, &llm), "claude-opus-4-1");
        assert_eq!(config.resolve_model("openai", None, &llm), "gpt-4o");
    }
}
