mod chat;
mod cli;
mod config;
mod models;
mod terminal;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;

use parley_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};
use crate::config::CliConfig;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    let cli_config =
        CliConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let config = Config::from_env();
    config.log_summary();

    let outcome = match args.command {
        Command::Chat {
            message,
            model,
            provider,
            max_depth,
            system_prompt,
        } => {
            let options = chat::ChatOptions {
                message,
                model,
                provider,
                max_depth,
                system_prompt,
            };
            chat::run(&config, &cli_config, options, terminal).await
        }
        Command::Models {
            provider,
            vision,
            tools,
            min_context,
            refresh,
        } => {
            let options = models::ModelsOptions {
                provider,
                requirements: parley_llm::TaskRequirements {
                    needs_vision: vision,
                    needs_tools: tools,
                    min_context,
                },
                refresh,
            };
            models::run(&config, options, terminal).await
        }
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "command failed");
        terminal.print_error(&format!("{:#}", e))?;
        std::process::exit(1);
    }
    Ok(())
}
