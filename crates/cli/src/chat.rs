//! `parley chat`: one executor per invocation, one consent listener per session.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_core::config::Config;
use parley_llm::{AdapterRegistry, ResolvedModel};
use parley_tool_runtime::consent::{
    ConsentGate, InMemoryIntegrationStore, IntegrationCatalog, IntegrationStore, PendingConsent,
};
use parley_tool_runtime::history::HistoryEntry;
use parley_tool_runtime::policy::PolicyRegistry;
use parley_tool_runtime::session::{SessionContext, UiNotification, UiSink};
use parley_tool_runtime::ToolExecutor;

use crate::config::CliConfig;
use crate::terminal::Terminal;
use crate::tools;

pub struct ChatOptions {
    pub message: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub max_depth: Option<usize>,
    pub system_prompt: Option<String>,
}

/// Prints citations as they are published. Tool calls and results already
/// arrive on the chat stream.
struct TerminalSink {
    terminal: Terminal,
}

impl UiSink for TerminalSink {
    fn notify(&self, _session_id: &str, notification: UiNotification) {
        if let UiNotification::Citations { citations, .. } = notification {
            if let Err(e) = self.terminal.print_citations(&citations) {
                warn!(error = %e, "failed to print citations");
            }
        }
    }
}

pub async fn run(
    config: &Config,
    cli_config: &CliConfig,
    options: ChatOptions,
    terminal: Terminal,
) -> Result<()> {
    let registry = AdapterRegistry::from_config(&config.llm);
    if registry.is_empty() {
        bail!(
            "no model provider configured; set ANTHROPIC_API_KEY, OPENAI_API_KEY, \
             GROQ_API_KEY, OPENROUTER_API_KEY or OLLAMA_URL"
        );
    }
    let resolved = resolve_model(&registry, config, cli_config, &options)?;
    info!(provider = %resolved.provider, model = %resolved.model, "chat model selected");

    let tools = Arc::new(tools::default_registry(cli_config)?);
    let mut executor = ToolExecutor::new(resolved.adapter.clone(), tools, resolved.model.clone())
        .with_max_depth(options.max_depth.unwrap_or(config.runtime.max_tool_depth))
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);
    let system_prompt = options
        .system_prompt
        .or_else(|| cli_config.system_prompt.clone())
        .or_else(|| config.runtime.system_prompt.clone());
    if let Some(prompt) = system_prompt {
        executor = executor.with_system_prompt(prompt);
    }

    let (session, consent_requests) = build_session(cli_config, terminal).await;
    let listener = tokio::spawn(answer_consent(consent_requests, terminal));

    let mut history = Vec::new();
    let outcome = match options.message {
        Some(message) => run_turn(&executor, &session, &mut history, message, terminal).await,
        None => repl(&executor, &session, &mut history, &resolved, terminal).await,
    };
    listener.abort();
    outcome
}

fn resolve_model(
    registry: &AdapterRegistry,
    config: &Config,
    cli_config: &CliConfig,
    options: &ChatOptions,
) -> Result<ResolvedModel> {
    let provider_hint = options
        .provider
        .clone()
        .unwrap_or_else(|| config.llm.fallback_provider.clone());
    let model = cli_config.resolve_model(&provider_hint, options.model.as_deref(), &config.llm);

    match &options.provider {
        Some(name) => {
            let adapter = registry
                .get(name)
                .with_context(|| format!("provider '{}' is not configured", name))?;
            Ok(ResolvedModel {
                provider: name.clone(),
                model,
                adapter,
            })
        }
        None => Ok(registry.resolve(&model)?),
    }
}

async fn build_session(
    cli_config: &CliConfig,
    terminal: Terminal,
) -> (SessionContext, mpsc::UnboundedReceiver<PendingConsent>) {
    let session_id = format!("cli-{}", uuid::Uuid::new_v4());
    let (store, requests) = InMemoryIntegrationStore::new();
    for id in &cli_config.connected_integrations {
        store.connect(id);
        if !cli_config.needs_consent(id) {
            store.set_enabled(&session_id, id, true).await;
        }
    }

    let gate = ConsentGate::new(
        Arc::new(IntegrationCatalog::builtin()),
        Arc::new(store) as Arc<dyn IntegrationStore>,
    );
    let session = SessionContext::new(
        session_id,
        Arc::new(PolicyRegistry::with_builtin_policies()),
        Arc::new(gate),
    )
    .with_sink(Arc::new(TerminalSink { terminal }));
    for (id, tools) in cli_config.connected_tools() {
        session.register_integration_tools(id, tools);
    }
    (session, requests)
}

/// Answers consent requests from stdin while a turn is suspended on them.
async fn answer_consent(mut requests: mpsc::UnboundedReceiver<PendingConsent>, terminal: Terminal) {
    while let Some(pending) = requests.recv().await {
        let prompt = pending.prompt.clone();
        let accepted = match tokio::task::spawn_blocking(move || terminal.prompt_consent(&prompt)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                warn!(error = %e, "consent prompt failed, declining");
                false
            }
            Err(e) => {
                warn!(error = %e, "consent prompt task failed, declining");
                false
            }
        };
        pending.resolve(accepted);
    }
}

async fn repl(
    executor: &ToolExecutor,
    session: &SessionContext,
    history: &mut Vec<HistoryEntry>,
    resolved: &ResolvedModel,
    terminal: Terminal,
) -> Result<()> {
    terminal.print_banner(&resolved.provider, &resolved.model)?;
    loop {
        let input = match terminal.read_input()? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                return Ok(());
            }
        };
        if input.is_empty() {
            continue;
        }
        run_turn(executor, session, history, input, terminal).await?;
    }
}

/// Stream one reply to the terminal. Ctrl+C drops the stream, which stops
/// the turn at its next suspension point.
async fn run_turn(
    executor: &ToolExecutor,
    session: &SessionContext,
    history: &mut Vec<HistoryEntry>,
    message: String,
    terminal: Terminal,
) -> Result<()> {
    history.push(HistoryEntry::user(message));
    let (mut stream, finished) = executor.stream_turn(history.clone(), session.clone());

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) => terminal.display_event(&event)?,
                None => break,
            },
            _ = &mut interrupt => {
                terminal.print_info("\n[stopped]")?;
                break;
            }
        }
    }
    drop(stream);
    terminal.print_info("")?;

    // an interrupted turn keeps only the user message
    if let Ok(turn) = finished.await {
        *history = turn;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_tool_runtime::consent::ConsentDecision;
    use parley_tool_runtime::provider::mock::ScriptedAdapter;
    use parley_tool_runtime::{ConnectionAdapter, Role, StreamEvent, ToolCallChunk};

    fn scripted_executor(cli_config: &CliConfig) -> (ToolExecutor, Arc<ScriptedAdapter>) {
        let adapter = Arc::new(ScriptedAdapter::new());
        let tools = Arc::new(tools::default_registry(cli_config).unwrap());
        let executor = ToolExecutor::new(
            adapter.clone() as Arc<dyn ConnectionAdapter>,
            tools,
            "test-model",
        );
        (executor, adapter)
    }

    #[tokio::test]
    async fn test_history_keeps_tool_entries_across_turns() {
        let cli_config = CliConfig::default();
        let (executor, adapter) = scripted_executor(&cli_config);
        let (session, _requests) = build_session(&cli_config, Terminal::new()).await;
        adapter.queue_response(vec![
            StreamEvent::ToolCallChunk(ToolCallChunk::start("call_t", "get_current_time")),
            StreamEvent::ToolCallChunk(ToolCallChunk::delta("call_t", "{}")),
        ]);
        adapter.queue_text("It is noon.");
        adapter.queue_text("Still noon.");

        let mut history = Vec::new();
        run_turn(&executor, &session, &mut history, "Time?".into(), Terminal::new())
            .await
            .unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].tool_calls[0].name, "get_current_time");
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(history[3], HistoryEntry::assistant("It is noon."));

        run_turn(&executor, &session, &mut history, "And now?".into(), Terminal::new())
            .await
            .unwrap();
        assert_eq!(adapter.requests()[2].messages.len(), 5);
        assert_eq!(history.len(), 6);
        assert_eq!(history[5], HistoryEntry::assistant("Still noon."));
    }

    #[tokio::test]
    async fn test_refusal_text_is_not_stored_as_reply() {
        let cli_config = CliConfig::default();
        let (executor, adapter) = scripted_executor(&cli_config);
        let (session, _requests) = build_session(&cli_config, Terminal::new()).await;
        adapter.queue_response(vec![
            StreamEvent::ToolCallChunk(ToolCallChunk::start("call_gh", "github_create_issue")),
            StreamEvent::ToolCallChunk(ToolCallChunk::delta("call_gh", r#"{"title":"bug"}"#)),
        ]);

        let mut history = Vec::new();
        run_turn(&executor, &session, &mut history, "File a bug".into(), Terminal::new())
            .await
            .unwrap();
        assert_eq!(history, vec![HistoryEntry::user("File a bug")]);
    }

    #[tokio::test]
    async fn test_session_registers_configured_integration_tools() {
        let cli_config: CliConfig = toml::from_str(
            r#"
connected_integrations = ["notion"]
auto_enabled_integrations = ["notion"]

[integration_tools]
notion = ["create_page"]
"#,
        )
        .unwrap();
        let (session, _requests) = build_session(&cli_config, Terminal::new()).await;
        assert_eq!(session.consent.integration_for("create_page").as_deref(), Some("notion"));
        assert_eq!(
            session.consent.check(&session.session_id, "create_page").await,
            ConsentDecision::Granted
        );
    }

    #[tokio::test]
    async fn test_session_respects_auto_enabled_integrations() {
        let cli_config: CliConfig = toml::from_str(
            r#"
connected_integrations = ["gmail", "github"]
auto_enabled_integrations = ["github"]
"#,
        )
        .unwrap();
        let (session, mut requests) = build_session(&cli_config, Terminal::new()).await;
        assert!(session.session_id.starts_with("cli-"));

        let decision = session
            .consent
            .check(&session.session_id, "github_create_issue")
            .await;
        assert_eq!(decision, ConsentDecision::Granted);

        let not_connected = session.consent.check(&session.session_id, "slack_post_message").await;
        assert!(matches!(not_connected, ConsentDecision::NotConnected { .. }));

        // gmail is connected but still asks
        let gate = session.consent.clone();
        let id = session.session_id.clone();
        let check = tokio::spawn(async move { gate.check(&id, "gmail_send_email").await });
        let pending = requests.recv().await.unwrap();
        assert_eq!(pending.prompt.integration_id, "gmail");
        pending.resolve(false);
        assert!(matches!(check.await.unwrap(), ConsentDecision::Declined { .. }));
    }
}
