use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};
use tracing::debug;

use parley_llm::{LivenessEntry, UnifiedModel};
use parley_tool_runtime::citations::Citation;
use parley_tool_runtime::consent::ConsentPrompt;
use parley_tool_runtime::stream::ChatEvent;

const MAX_RESULT_CHARS: usize = 500;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Terminal I/O for the chat REPL and the models listing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_banner(&self, provider: &str, model: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("parley"),
            ResetColor,
            Print(" - tool-calling chat\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Provider: {} | Model: {}\n", provider, model)),
            Print("Type 'exit' or 'quit' to end. Ctrl+C stops the current reply.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns None if the user wants to exit.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let trimmed = input.trim();
        if is_exit_command(trimmed) {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    pub fn display_event(&self, event: &ChatEvent) -> Result<()> {
        let mut stdout = io::stdout();
        match event {
            ChatEvent::Text { content } => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::ASSISTANT_TEXT),
                    Print(content),
                    ResetColor,
                )?;
            }
            ChatEvent::ToolCall { name, args, .. } => {
                execute!(
                    stdout,
                    Print("\n"),
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[using {}] {}\n", name, args)),
                    ResetColor,
                )?;
            }
            ChatEvent::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                let (color, label) = if *is_error {
                    (Colors::ERROR, "error")
                } else {
                    (Colors::TOOL_RESULT, "result")
                };
                execute!(
                    stdout,
                    SetForegroundColor(color),
                    Print(format!("  [{} {}]: {}\n", name, label, truncate_for_display(content))),
                    ResetColor,
                )?;
            }
            ChatEvent::Usage(usage) => {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "usage"
                );
            }
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_citations(&self, citations: &[Citation]) -> Result<()> {
        let mut stdout = io::stdout();
        for (i, citation) in citations.iter().enumerate() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!("  [{}] {} ({}) {}\n", i + 1, citation.title, citation.source, citation.url)),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// Ask whether an integration may be used for the rest of the session.
    /// An empty answer counts as yes.
    pub fn prompt_consent(&self, prompt: &ConsentPrompt) -> Result<bool> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::TOOL_CALL),
            Print(format!(
                "The assistant wants to use {} ({}).\n",
                prompt.display_name, prompt.tool
            )),
            ResetColor,
            SetForegroundColor(Colors::USER_PROMPT),
            Print("Allow for this session? [Y/n] "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(parse_consent_answer(&input))
    }

    pub fn print_models(&self, models: &[(UnifiedModel, Option<LivenessEntry>)]) -> Result<()> {
        let mut stdout = io::stdout();
        if models.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No usable models found.\n"),
                ResetColor,
            )?;
            return Ok(());
        }

        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("Usable models:\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "{:<12} {:<48} {:>9} {:<7} {:<20}\n",
                "PROVIDER", "MODEL", "CONTEXT", "VISION", "CHECKED"
            )),
            Print(format!("{}\n", "-".repeat(100))),
            ResetColor,
        )?;

        for (model, entry) in models {
            let checked = entry
                .as_ref()
                .map(|e| e.last_checked.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            execute!(
                stdout,
                Print(format!(
                    "{:<12} {:<48} {:>9} {:<7} {:<20}\n",
                    model.provider,
                    model.id,
                    model.context_window,
                    if model.supports_vision { "yes" } else { "no" },
                    checked,
                )),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

fn is_exit_command(input: &str) -> bool {
    matches!(input, "exit" | "quit" | "/exit" | "/quit")
}

fn parse_consent_answer(input: &str) -> bool {
    let answer = input.trim().to_lowercase();
    answer.is_empty() || answer == "y" || answer == "yes"
}

fn truncate_for_display(content: &str) -> String {
    let total = content.chars().count();
    if total <= MAX_RESULT_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(MAX_RESULT_CHARS).collect();
    format!("{}... ({} chars total)", head, total)
}
