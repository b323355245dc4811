//! Tool system for agentic capabilities.
//!
//! Tools come in two layers. Atomic tools touch the outside world (files,
//! processes, HTTP). Generative tools write new capability artifacts
//! (skills, tool sources, MCP server projects) under the Jarvis home;
//! those artifacts are never registered live.

pub mod create_mcp;
pub mod create_skill;
pub mod create_tool;
pub mod file_read;
pub mod file_write;
pub mod http_request;
pub mod shell_exec;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::paths;
use crate::core::events::{ToolOutput, codes};

/// Tool definition sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

/// Which family a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLayer {
    /// Direct side effects: files, processes, HTTP
    Atomic,
    /// Writes new capability artifacts
    Generative,
    /// Registered by the embedding application
    Custom,
}

impl ToolLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolLayer::Atomic => "atomic",
            ToolLayer::Generative => "generative",
            ToolLayer::Custom => "custom",
        }
    }
}

impl fmt::Display for ToolLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root directory relative paths resolve against.
    pub root: PathBuf,

    /// Optional outer timeout for a single execution.
    pub timeout: Option<Duration>,

    /// Jarvis home; generative tools write below it.
    pub home: PathBuf,
}

impl ToolContext {
    pub fn new(root: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            root,
            timeout,
            home: paths::jarvis_home(),
        }
    }

    #[must_use]
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }
}

/// Async tool handler function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutput> + Send>>;
pub type ToolHandler = Arc<dyn Fn(&Value, &ToolContext) -> ToolFuture + Send + Sync>;

/// A registered capability: its schema plus the handler that runs it.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    pub layer: ToolLayer,
    handler: ToolHandler,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.definition.name)
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Wraps an async handler taking owned input and context.
    pub fn new<F, Fut>(definition: ToolDefinition, layer: ToolLayer, f: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutput> + Send + 'static,
    {
        let handler: ToolHandler =
            Arc::new(move |input: &Value, ctx: &ToolContext| -> ToolFuture {
                Box::pin(f(input.clone(), ctx.clone()))
            });
        Self {
            definition,
            layer,
            handler,
        }
    }

    /// Wraps a blocking handler; it runs on the blocking thread pool.
    pub fn blocking(
        definition: ToolDefinition,
        layer: ToolLayer,
        f: fn(&Value, &ToolContext) -> ToolOutput,
    ) -> Self {
        Self::new(definition, layer, move |input, ctx| async move {
            tokio::task::spawn_blocking(move || f(&input, &ctx))
                .await
                .unwrap_or_else(|e| panic_output(&e))
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Registration-time failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateTool { name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool { name } => {
                write!(f, "Tool '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Every built-in tool, in catalog order.
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool::blocking(
            file_read::definition(),
            ToolLayer::Atomic,
            file_read::execute,
        ),
        Tool::blocking(
            file_write::definition(),
            ToolLayer::Atomic,
            file_write::execute,
        ),
        Tool::new(
            shell_exec::definition(),
            ToolLayer::Atomic,
            shell_exec::execute,
        ),
        Tool::new(
            http_request::definition(),
            ToolLayer::Atomic,
            http_request::execute,
        ),
        Tool::blocking(
            create_skill::definition(),
            ToolLayer::Generative,
            create_skill::execute,
        ),
        Tool::blocking(
            create_tool::definition(),
            ToolLayer::Generative,
            create_tool::execute,
        ),
        Tool::blocking(
            create_mcp::definition(),
            ToolLayer::Generative,
            create_mcp::execute,
        ),
    ]
}

/// Tool registry (definitions + executors).
///
/// Built once by the application and shared behind an `Arc`; `execute`
/// only needs `&self`, so concurrent calls are fine.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool discovered.
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.discover();
        registry
    }

    /// # Errors
    /// Returns `RegistryError::DuplicateTool` if the name is taken.
    pub fn register(&mut self, tool: Tool) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool { name });
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Registers catalog tools not already present; returns how many were added.
    pub fn discover(&mut self) -> usize {
        let mut added = 0;
        for tool in catalog() {
            if self.contains(tool.name()) {
                continue;
            }
            if self.register(tool).is_ok() {
                added += 1;
            }
        }
        tracing::info!(added, total = self.len(), "tool discovery finished");
        added
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(Tool::name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(|t| &t.definition)
    }

    /// The full catalog in the provider-agnostic shape sent with requests.
    pub fn export_schema(&self) -> Vec<ToolDefinition> {
        self.definitions().cloned().collect()
    }

    /// Runs a tool by name.
    ///
    /// Never fails: an unknown name, a panic inside the handler or the
    /// context timeout all come back as a failed `ToolOutput`.
    pub async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            return self.unknown_tool_output(name);
        };

        let mut handle = tokio::spawn((tool.handler)(input, ctx));

        match ctx.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => panic_output(&e),
                Err(_) => {
                    handle.abort();
                    ToolOutput::failure(
                        codes::TIMEOUT,
                        format!(
                            "Tool execution timed out after {} seconds",
                            limit.as_secs_f64()
                        ),
                    )
                }
            },
            None => handle.await.unwrap_or_else(|e| panic_output(&e)),
        }
    }

    fn unknown_tool_output(&self, name: &str) -> ToolOutput {
        let mut available = self.names();
        available.sort_unstable();
        ToolOutput::failure(
            codes::UNKNOWN_TOOL,
            format!(
                "Unknown tool: {name}. Available tools: {}",
                available.join(", ")
            ),
        )
    }
}

fn panic_output(err: &tokio::task::JoinError) -> ToolOutput {
    tracing::warn!(error = %err, "tool task failed");
    ToolOutput::failure(codes::PANIC, format!("Tool execution panicked: {err}"))
}

// ============================================================================
// Helpers shared by tool implementations
// ============================================================================

/// Deserializes tool input, mapping failures to `invalid_input`.
pub(crate) fn parse_input<T: DeserializeOwned>(input: &Value) -> Result<T, ToolOutput> {
    serde_json::from_value(input.clone())
        .map_err(|e| ToolOutput::failure(codes::INVALID_INPUT, format!("Invalid input: {e}")))
}

/// Expands `~` and `$VAR`, then joins relative paths onto `root`.
///
/// Unknown variables are left as written.
pub(crate) fn resolve_path(path: &str, root: &Path) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| shellexpand::tilde(path));
    let requested = Path::new(expanded.as_ref());
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    }
}

/// Upper bound for a per-call `timeout` argument.
pub(crate) const MAX_TOOL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Turns a `timeout` argument in seconds into a `Duration`.
///
/// Missing, non-positive or non-finite values give `default`; anything
/// above [`MAX_TOOL_TIMEOUT`] is capped.
pub(crate) fn timeout_from_secs(secs: Option<f64>, default: Duration) -> Duration {
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
            .map_or(MAX_TOOL_TIMEOUT, |d| d.min(MAX_TOOL_TIMEOUT)),
        _ => default,
    }
}

/// Returns the prefix of `s` holding at most `max_chars` characters, or
/// `None` if `s` already fits.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> Option<&str> {
    s.char_indices().nth(max_chars).map(|(idx, _)| &s[..idx])
}

/// Validates a kebab-case artifact name, mapping rejection to `invalid_input`.
pub(crate) fn validate_kebab_name(name: &str) -> Result<(), ToolOutput> {
    crate::skills::validate_name(name)
        .map_err(|reason| ToolOutput::failure(codes::INVALID_INPUT, reason))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            ToolDefinition {
                name: name.to_string(),
                description: "Echo the input".to_string(),
                input_schema: json!({"type": "object"}),
            },
            ToolLayer::Custom,
            |input: Value, _ctx: ToolContext| async move { ToolOutput::success(input.to_string()) },
        )
    }

    async fn panicking(_input: Value, _ctx: ToolContext) -> ToolOutput {
        panic!("boom")
    }

    async fn sleepy(_input: Value, _ctx: ToolContext) -> ToolOutput {
        tokio::time::sleep(Duration::from_secs(5)).await;
        ToolOutput::success("late")
    }

    fn test_ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(dir.path().to_path_buf(), None).with_home(dir.path().join("home"))
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let err = registry.register(echo_tool("echo")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateTool {
                name: "echo".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discover_is_idempotent() {
        let mut registry = ToolRegistry::new();

        let first = registry.discover();
        let size = registry.len();
        let second = registry.discover();

        assert!(first > 0);
        assert_eq!(second, 0);
        assert_eq!(registry.len(), size);
    }

    #[test]
    fn test_discover_skips_already_registered_names() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("file_read")).unwrap();

        let added = registry.discover();
        assert_eq!(added, catalog().len() - 1);
        assert_eq!(registry.get("file_read").unwrap().layer, ToolLayer::Custom);
    }

    #[test]
    fn test_builtin_catalog_layers() {
        let registry = ToolRegistry::builtins();
        assert_eq!(
            registry.names(),
            vec![
                "file_read",
                "file_write",
                "shell_exec",
                "http_request",
                "create_skill",
                "create_tool",
                "create_mcp",
            ]
        );
        assert_eq!(registry.get("shell_exec").unwrap().layer, ToolLayer::Atomic);
        assert_eq!(
            registry.get("create_mcp").unwrap().layer,
            ToolLayer::Generative
        );
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_export_schema_has_object_parameters() {
        for def in ToolRegistry::builtins().export_schema() {
            assert!(!def.description.is_empty(), "{} lacks description", def.name);
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
        }
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_lists_sorted_names() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("zeta")).unwrap();
        registry.register(echo_tool("alpha")).unwrap();

        let output = registry.execute("missing", &json!({}), &test_ctx(&dir)).await;
        let (code, message) = output.error_info().unwrap();
        assert_eq!(code, "unknown_tool");
        assert!(message.ends_with("Available tools: alpha, zeta"), "{message}");
    }

    #[tokio::test]
    async fn test_execute_converts_panic_to_failure() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                echo_tool("explode").definition,
                ToolLayer::Custom,
                panicking,
            ))
            .unwrap();

        let output = registry.execute("explode", &json!({}), &test_ctx(&dir)).await;
        assert!(!output.is_ok());
        assert_eq!(output.error_info().unwrap().0, "panic");
    }

    #[tokio::test]
    async fn test_execute_applies_context_timeout() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                echo_tool("slow").definition,
                ToolLayer::Custom,
                sleepy,
            ))
            .unwrap();

        let mut ctx = test_ctx(&dir);
        ctx.timeout = Some(Duration::from_millis(50));
        let output = registry.execute("slow", &json!({}), &ctx).await;
        assert_eq!(output.error_info().unwrap().0, "timeout");
    }

    #[tokio::test]
    async fn test_execute_passes_input_through() {
        let dir = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let output = registry
            .execute("echo", &json!({"k": 1}), &test_ctx(&dir))
            .await;
        assert!(output.is_ok());
        assert_eq!(output.output, r#"{"k":1}"#);
    }

    #[test]
    fn test_resolve_path_joins_relative_and_expands_tilde() {
        let root = Path::new("/work");
        assert_eq!(resolve_path("a/b.txt", root), PathBuf::from("/work/a/b.txt"));
        assert_eq!(resolve_path("/etc/hosts", root), PathBuf::from("/etc/hosts"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_path("~/notes.md", root), home.join("notes.md"));
        }
    }

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), Some("hé"));
        assert_eq!(truncate_chars("hi", 2), None);
    }

    #[test]
    fn test_timeout_from_secs_caps_and_defaults() {
        let default = Duration::from_secs(30);
        assert_eq!(timeout_from_secs(None, default), default);
        assert_eq!(timeout_from_secs(Some(-1.0), default), default);
        assert_eq!(timeout_from_secs(Some(f64::NAN), default), default);
        assert_eq!(timeout_from_secs(Some(f64::INFINITY), default), default);
        assert_eq!(timeout_from_secs(Some(1.5), default), Duration::from_millis(1500));
        assert_eq!(timeout_from_secs(Some(1e300), default), MAX_TOOL_TIMEOUT);
        assert_eq!(timeout_from_secs(Some(7200.0), default), MAX_TOOL_TIMEOUT);
    }
}
