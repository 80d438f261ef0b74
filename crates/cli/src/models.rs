//! `parley models`: probe configured providers and route by capability.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, warn};

use parley_core::config::Config;
use parley_llm::{route, AdapterRegistry, ModelLivenessRegistry, TaskRequirements, UnifiedModel};

use crate::config::CliConfig;
use crate::terminal::Terminal;

pub struct ModelsOptions {
    pub provider: Option<String>,
    pub requirements: TaskRequirements,
    pub refresh: bool,
}

pub async fn run(config: &Config, options: ModelsOptions, terminal: Terminal) -> Result<()> {
    let registry = AdapterRegistry::from_config(&config.llm);
    let wanted = |name: &str| options.provider.as_deref().map_or(true, |p| p == name);
    let names: Vec<String> = registry
        .names()
        .into_iter()
        .filter(|name| wanted(*name))
        .map(String::from)
        .collect();
    if names.is_empty() {
        match &options.provider {
            Some(name) => bail!("provider '{}' is not configured", name),
            None => bail!("no model provider configured"),
        }
    }

    let liveness = ModelLivenessRegistry::new(&config.liveness);
    let cache = CliConfig::liveness_cache_path()?;
    if !options.refresh {
        restore_cache(&liveness, &cache);
    }

    for name in &names {
        let Some(catalog) = registry.catalog(name) else {
            continue;
        };
        match liveness.load_provider(catalog.as_ref()).await {
            Ok(usable) => terminal.print_info(&format!("{}: {} usable models", name, usable))?,
            Err(e) => terminal.print_error(&format!("{}: {}", name, e))?,
        }
    }
    save_cache(&liveness, &cache)?;

    let usable: Vec<UnifiedModel> = liveness
        .usable_models()
        .into_iter()
        .filter(|m| wanted(m.provider.as_str()))
        .collect();
    let rows: Vec<_> = usable
        .iter()
        .map(|m| (m.clone(), liveness.liveness(&m.provider, &m.id)))
        .collect();
    terminal.print_models(&rows)?;

    match route(&usable, &options.requirements) {
        Some(best) => terminal.print_info(&format!("Best match: {}/{}", best.provider, best.id))?,
        None => terminal.print_info("No model matches the requested capabilities.")?,
    }
    Ok(())
}

fn restore_cache(liveness: &ModelLivenessRegistry, path: &Path) {
    let Ok(json) = std::fs::read_to_string(path) else {
        return;
    };
    match liveness.restore(&json) {
        Ok(entries) => debug!(entries, path = %path.display(), "restored liveness cache"),
        Err(e) => warn!(error = %e, path = %path.display(), "ignoring unreadable liveness cache"),
    }
}

fn save_cache(liveness: &ModelLivenessRegistry, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, liveness.snapshot()?)
        .with_context(|| format!("failed to write liveness cache: {}", path.display()))
}
