//! Shell tool for executing commands.
//!
//! Commands run through `sh -c` in their own process group. A command
//! matching the destructive-pattern list is refused before anything is
//! spawned. On timeout, or when the calling task is dropped, the whole
//! group is killed.

use std::io::Write;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::RegexSet;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, parse_input, resolve_path, timeout_from_secs};
use crate::core::events::{ToolOutput, codes};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STDOUT_BYTES: usize = 50_000;
const MAX_STDERR_BYTES: usize = 10_000;

/// Matched against the lowercased command.
static DENIED_COMMANDS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // rm -rf of /, /*, ~ or $HOME
        r"\brm\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-\S+\s+)*(?:/\*?|~/?|\$\{?home\}?/?)(?:[\s;&|]|$)",
        r"\bsudo\s+rm\b",
        r"\bmkfs\b",
        r"\bdd\b.*\bof=/dev/(?:sd|nvme|hd|vd|xvd|disk|rdisk|mmcblk)",
        r">\s*/dev/(?:sd|nvme|hd|vd|xvd|disk|rdisk|mmcblk)",
        r"\bchmod\s+(?:-r\s+)?777\s+/(?:\s|$)",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    ])
    .expect("deny-list patterns compile")
});

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "shell_exec".to_string(),
        description: "Run a shell command with sh -c and return its stdout and stderr. \
            A non-zero exit code is reported as a failure with the output kept. \
            Destructive commands (recursive delete of / or home, disk formatting, raw \
            device writes, fork bombs) are refused."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (default: current root)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["command"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ShellInput {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout: Option<f64>,
}

/// Returns true if the command matches a destructive pattern.
pub fn is_denied(command: &str) -> bool {
    DENIED_COMMANDS.is_match(&command.to_lowercase())
}

pub async fn execute(input: Value, ctx: ToolContext) -> ToolOutput {
    let input: ShellInput = match parse_input(&input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    let command = input.command.trim();
    if command.is_empty() {
        return ToolOutput::failure(codes::INVALID_INPUT, "command cannot be empty");
    }

    if is_denied(command) {
        tracing::warn!(command, "refusing destructive shell command");
        return ToolOutput::failure(
            codes::SECURITY_DENIED,
            format!("Command blocked for safety: {command}"),
        )
        .with_metadata("command", command);
    }

    let workdir = match &input.workdir {
        Some(dir) => resolve_path(dir, &ctx.root),
        None => ctx.root.clone(),
    };
    if !workdir.is_dir() {
        return ToolOutput::failure(
            codes::NOT_FOUND,
            format!("Working directory not found: {}", workdir.display()),
        );
    }

    let timeout = timeout_from_secs(input.timeout, DEFAULT_TIMEOUT);

    run_command(command, &workdir, timeout).await
}

async fn run_command(command: &str, workdir: &std::path::Path, timeout: Duration) -> ToolOutput {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .env("TERM", "dumb")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ToolOutput::failure(
                codes::SPAWN_ERROR,
                format!("Failed to execute command '{command}': {e}"),
            );
        }
    };

    tracing::debug!(command, pid = child.id(), "spawned shell command");
    let guard = ProcessGroupGuard::new(child.id());

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            guard.disarm();
            output
        }
        Ok(Err(e)) => {
            return ToolOutput::failure(
                codes::IO_ERROR,
                format!("Failed to wait for command '{command}': {e}"),
            );
        }
        Err(_) => {
            drop(guard);
            return ToolOutput::failure(
                codes::TIMEOUT,
                format!(
                    "Command timed out after {} seconds",
                    timeout.as_secs_f64()
                ),
            )
            .with_metadata("exit_code", Value::Null)
            .with_metadata("command", command)
            .with_metadata("timed_out", true);
        }
    };

    let (stdout, stdout_truncated) = truncate_at_utf8_boundary(&output.stdout, MAX_STDOUT_BYTES);
    let (stderr, stderr_truncated) = truncate_at_utf8_boundary(&output.stderr, MAX_STDERR_BYTES);

    let stdout_file = stdout_truncated
        .then(|| spill_to_temp_file(&output.stdout, "stdout"))
        .flatten();
    let stderr_file = stderr_truncated
        .then(|| spill_to_temp_file(&output.stderr, "stderr"))
        .flatten();

    let mut text = stdout;
    if stdout_truncated {
        push_truncation_notice(&mut text, "stdout", stdout_file.as_deref());
    }
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(&stderr);
        if stderr_truncated {
            push_truncation_notice(&mut text, "stderr", stderr_file.as_deref());
        }
    }
    if text.is_empty() {
        text = "(no output)".to_string();
    }

    let exit_code = output.status.code().unwrap_or(-1);
    let mut result = if exit_code == 0 {
        ToolOutput::success(text)
    } else {
        ToolOutput::failure(codes::EXIT_STATUS, format!("exit code: {exit_code}")).with_output(text)
    };
    result = result
        .with_metadata("exit_code", exit_code)
        .with_metadata("command", command)
        .with_metadata("timed_out", false);

    if let Some(path) = stdout_file {
        result = result.with_metadata("stdout_file", path);
    }
    if let Some(path) = stderr_file {
        result = result.with_metadata("stderr_file", path);
    }
    result
}

/// Tells the model a stream was cut and where the rest lives.
fn push_truncation_notice(text: &mut String, stream_name: &str, spill: Option<&str>) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    match spill {
        Some(path) => text.push_str(&format!(
            "... ({stream_name} truncated; full output saved to {path})\n"
        )),
        None => text.push_str(&format!("... ({stream_name} truncated)\n")),
    }
}

/// Kills the child's process group when dropped, unless disarmed.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: killpg only sends a signal; a stale group id yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// Keeps the full stream on disk so the model can page through it with
/// `file_read`.
fn spill_to_temp_file(bytes: &[u8], stream_name: &str) -> Option<String> {
    let mut file = tempfile::Builder::new()
        .prefix("jarvis-shell-")
        .suffix(&format!("-{stream_name}.txt"))
        .tempfile()
        .ok()?;
    file.write_all(bytes).ok()?;
    let (_, path) = file.keep().ok()?;
    Some(path.to_string_lossy().into_owned())
}

/// Cuts `bytes` to at most `max_bytes` without splitting a character.
///
/// Returns the (lossily decoded) text and whether anything was cut.
fn truncate_at_utf8_boundary(bytes: &[u8], max_bytes: usize) -> (String, bool) {
    if bytes.len() <= max_bytes {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }

    let mut end = max_bytes;
    // Back up over continuation bytes (10xxxxxx) to a character start.
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), true)
}
