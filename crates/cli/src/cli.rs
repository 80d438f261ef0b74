use clap::{Parser, Subcommand};

/// Terminal front end for the parley tool-calling runtime.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Chat with tool-calling models from the terminal")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/parley/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat with a model. Runs one turn with --message, otherwise a REPL.
    Chat {
        /// Single message to send; exits after the reply
        #[arg(long, short)]
        message: Option<String>,

        /// Model id, optionally prefixed with a provider (`groq/llama-3.3-70b-versatile`)
        #[arg(long)]
        model: Option<String>,

        /// Provider to use instead of resolving from the model id
        #[arg(long)]
        provider: Option<String>,

        /// Maximum rounds of tool calls per turn
        #[arg(long)]
        max_depth: Option<usize>,

        /// System prompt override
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Probe configured providers and list the models the keys can use.
    Models {
        /// Only load this provider
        #[arg(long)]
        provider: Option<String>,

        /// Route for a task that needs image input
        #[arg(long)]
        vision: bool,

        /// Route for a task that needs tool calling
        #[arg(long)]
        tools: bool,

        /// Route for a task that needs at least this many context tokens
        #[arg(long)]
        min_context: Option<u32>,

        /// Ignore the cached liveness snapshot and probe everything again
        #[arg(long)]
        refresh: bool,
    },
}
