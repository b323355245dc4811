//! Chat command handler: a line-based REPL that keeps history across turns.

use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use jarvis_core::config::Config;
use jarvis_core::core::agent::AgentOptions;
use jarvis_core::core::interrupt::{self, InterruptedError};
use jarvis_core::providers::ChatMessage;

use super::exec;
use crate::modes;

const PROMPT: &str = "you> ";

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand<'a> {
    Tools,
    Clear,
    Exit,
    Unknown(&'a str),
}

impl<'a> SlashCommand<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let command = line.strip_prefix('/')?.split_whitespace().next()?;
        Some(match command {
            "tools" => SlashCommand::Tools,
            "clear" => SlashCommand::Clear,
            "exit" | "quit" => SlashCommand::Exit,
            other => SlashCommand::Unknown(other),
        })
    }
}

pub async fn run(root: &Path, config: &Config) -> Result<()> {
    // If stdin is piped, run exec mode instead
    if !io::stdin().is_terminal() {
        let mut prompt = String::new();
        io::stdin().lock().read_to_string(&mut prompt)?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            anyhow::bail!("No input provided via pipe");
        }
        return exec::run(root, prompt, config).await;
    }

    let options = AgentOptions::new(root.to_path_buf());
    let mut history: Vec<ChatMessage> = Vec::new();

    eprintln!(
        "Jarvis ({}) · /tools /clear /exit · Ctrl+C cancels a reply",
        config.model
    );

    loop {
        print!("{PROMPT}");
        io::stdout().flush()?;

        let Some(line) = read_line().await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match SlashCommand::parse(input) {
            Some(SlashCommand::Exit) => break,
            Some(SlashCommand::Clear) => {
                history.clear();
                eprintln!("History cleared.");
                continue;
            }
            Some(SlashCommand::Tools) => {
                let mut names = options.registry.names();
                names.sort_unstable();
                eprintln!("Tools: {}", names.join(", "));
                continue;
            }
            Some(SlashCommand::Unknown(other)) => {
                eprintln!("Unknown command: /{other}");
                continue;
            }
            None => {}
        }

        interrupt::reset();
        let mut messages = history.clone();
        messages.push(ChatMessage::user(input));

        match modes::exec::run_turn_rendered(messages, config, &options).await {
            Ok(outcome) => history = outcome.messages,
            Err(e) if e.downcast_ref::<InterruptedError>().is_some() => {
                interrupt::reset();
            }
            // Already shown by the renderer; the turn is dropped from history.
            Err(e) => tracing::warn!(error = ?e, "chat turn failed"),
        }
    }

    Ok(())
}

/// Reads one line from stdin off the runtime threads; `None` on EOF.
async fn read_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let read = io::stdin().read_line(&mut line)?;
        Ok::<_, io::Error>((read > 0).then_some(line))
    })
    .await
    .context("stdin reader task")?
    .context("read stdin")
}
