//! Streamed stdout/stderr rendering and exec wrapper.
//!
//! Assistant text goes to stdout as it streams; tool progress, errors and
//! interrupts go to stderr so piping the reply stays clean.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Instant;

use anyhow::Result;
use jarvis_core::config::Config;
use jarvis_core::core::agent::{self, AgentEventRx, AgentOptions, TurnOutcome};
use jarvis_core::core::events::{AgentEvent, StopReason, ToolOutput};
use jarvis_core::providers::ChatMessage;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Longest command preview shown for `shell_exec`.
const COMMAND_PREVIEW_CHARS: usize = 80;

/// Sends a prompt on a fresh history and streams the reply.
///
/// # Errors
/// Returns the turn error after the renderer has flushed it.
pub async fn run_exec(prompt: &str, config: &Config, options: &AgentOptions) -> Result<String> {
    let outcome = run_turn_rendered(vec![ChatMessage::user(prompt)], config, options).await?;
    Ok(outcome.final_text)
}

/// Runs one turn while a renderer task prints its events.
///
/// # Errors
/// Returns the turn error after the renderer has flushed it.
pub async fn run_turn_rendered(
    messages: Vec<ChatMessage>,
    config: &Config,
    options: &AgentOptions,
) -> Result<TurnOutcome> {
    let (tx, rx) = agent::create_event_channel();
    let renderer = spawn_exec_renderer_task(rx, io::stdout(), io::stderr());

    let result = agent::run_turn(messages, config, options, tx).await;

    // The sender is gone once run_turn returns; wait for the tail to print.
    let _ = renderer.await;
    result
}

/// Writes agent events to an output and a status stream.
pub struct ExecRenderer<O: Write, E: Write> {
    out: O,
    err: E,
    /// Assistant text is on screen without a trailing newline.
    needs_final_newline: bool,
    tool_start_times: HashMap<String, Instant>,
}

impl<O: Write, E: Write> ExecRenderer<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            needs_final_newline: false,
            tool_start_times: HashMap::new(),
        }
    }

    pub fn handle_event(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::AssistantDelta { text } => {
                if !text.is_empty() {
                    let _ = write!(self.out, "{text}");
                    let _ = self.out.flush();
                    self.needs_final_newline = !text.ends_with('\n');
                }
            }
            AgentEvent::ToolStarted { id, name, input } => {
                self.end_assistant_line();
                self.tool_start_times.insert(id.clone(), Instant::now());
                match tool_preview(name, input) {
                    Some(preview) => {
                        let _ = writeln!(self.err, "⚙ {name}: {preview}");
                    }
                    None => {
                        let _ = writeln!(self.err, "⚙ {name}");
                    }
                }
            }
            AgentEvent::ToolCompleted { id, name, result } => {
                let elapsed = self
                    .tool_start_times
                    .remove(id)
                    .map(|start| format!(" ({:.2}s)", start.elapsed().as_secs_f64()))
                    .unwrap_or_default();
                let _ = writeln!(self.err, "{}{elapsed}", completion_line(name, result));
            }
            AgentEvent::Error {
                kind,
                message,
                details,
            } => {
                self.end_assistant_line();
                let _ = writeln!(self.err, "Error [{kind}]: {message}");
                if let Some(details) = details {
                    let _ = writeln!(self.err, "  Details: {details}");
                }
            }
            AgentEvent::Interrupted => {
                self.end_assistant_line();
                let _ = writeln!(self.err, "^C Interrupted.");
            }
            AgentEvent::TurnCompleted { stop, .. } => {
                if *stop == StopReason::RoundLimitExceeded {
                    tracing::info!("turn stopped at the round limit");
                }
            }
            AgentEvent::TurnStarted
            | AgentEvent::RoundStarted { .. }
            | AgentEvent::AssistantCompleted { .. }
            | AgentEvent::UsageUpdate { .. } => {}
        }
        let _ = self.err.flush();
    }

    /// Prints the final newline after assistant output, if still missing.
    pub fn finish(&mut self) {
        self.end_assistant_line();
    }

    fn end_assistant_line(&mut self) {
        if self.needs_final_newline {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.needs_final_newline = false;
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

/// Spawns a task that renders events until the channel closes.
pub fn spawn_exec_renderer_task<O, E>(mut rx: AgentEventRx, out: O, err: E) -> JoinHandle<()>
where
    O: Write + Send + 'static,
    E: Write + Send + 'static,
{
    tokio::spawn(async move {
        let mut renderer = ExecRenderer::new(out, err);
        while let Some(event) = rx.recv().await {
            renderer.handle_event(&event);
        }
        renderer.finish();
    })
}

/// Short human-readable hint of what a tool is about to do.
fn tool_preview(name: &str, input: &Value) -> Option<String> {
    let field = match name {
        "shell_exec" => "command",
        "http_request" => "url",
        "file_read" | "file_write" => "path",
        "create_skill" | "create_tool" | "create_mcp" => "name",
        _ => return None,
    };
    let value = input.get(field)?.as_str()?;
    let first_line = value.lines().next().unwrap_or_default();
    let mut preview: String = first_line.chars().take(COMMAND_PREVIEW_CHARS).collect();
    if preview.len() < value.len() {
        preview.push('…');
    }
    Some(preview)
}

fn completion_line(name: &str, result: &ToolOutput) -> String {
    match result.error_info() {
        None => format!("✓ {name}"),
        Some((code, message)) => {
            let message = message.lines().next().unwrap_or_default();
            format!("✗ {name} [{code}]: {message}")
        }
    }
}
