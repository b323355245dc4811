//! Agent module for UI-agnostic execution.
//!
//! The agent drives the bounded model/tool loop and emits `AgentEvent`s
//! through an async channel. Nothing in this module writes to stdout or
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::{Config, paths};
use crate::core::events::{AgentEvent, ErrorKind, StopReason, ToolOutput, codes};
use crate::core::interrupt::{self, InterruptedError};
use crate::core::tool_calls::ToolCallAccumulator;
use crate::prompts::build_system_prompt;
use crate::providers::openai::{OpenAIChatCompletionsClient, OpenAIChatCompletionsConfig};
use crate::providers::{
    ChatMessage, ProviderError, ProviderStream, Role, StreamEvent, ToolCallRecord,
    resolve_api_key, resolve_base_url,
};
use crate::skills::load_skills;
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry};

/// Overrides `[provider].base_url`.
pub const BASE_URL_ENV: &str = "JARVIS_BASE_URL";
/// Used when the config has no `[provider].api_key`.
pub const API_KEY_ENV: &str = "JARVIS_API_KEY";

/// Appended to the reply when the model keeps requesting tools.
pub const ROUND_LIMIT_NOTICE: &str =
    "\n\n⚠️ Tool calls exceeded the maximum number of rounds; stopped.";

/// Options for agent execution.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Root directory for file operations.
    pub root: PathBuf,
    /// Jarvis home; skills are discovered and artifacts written below it.
    pub home: PathBuf,
    pub registry: Arc<ToolRegistry>,
}

impl AgentOptions {
    /// Options with every built-in tool and the default home.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            home: paths::jarvis_home(),
            registry: Arc::new(ToolRegistry::builtins()),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    #[must_use]
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }
}

/// Channel-based event sender (async, bounded).
///
/// Events are wrapped in `Arc` so a consumer can fan them out cheaply.
pub type AgentEventTx = mpsc::Sender<Arc<AgentEvent>>;

/// Channel-based event receiver (async, bounded).
pub type AgentEventRx = mpsc::Receiver<Arc<AgentEvent>>;

/// Default channel capacity for event streams.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded event channel with the default capacity.
pub fn create_event_channel() -> (AgentEventTx, AgentEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Event sender wrapper with best-effort and reliable send modes.
///
/// `send_delta()` never waits and drops the event when the consumer lags.
/// `send_important()` waits for room in the channel. The loop itself uses
/// `send_important()` for streamed text too, so partial replies are never
/// lost; `send_delta()` is there for progress-style events a caller adds.
#[derive(Clone)]
pub struct EventSender {
    tx: AgentEventTx,
}

impl EventSender {
    pub fn new(tx: AgentEventTx) -> Self {
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if the channel is full.
    pub fn send_delta(&self, ev: AgentEvent) {
        let _ = self.tx.try_send(Arc::new(ev));
    }

    /// Reliable send: awaits delivery. A closed channel is ignored.
    pub async fn send_important(&self, ev: AgentEvent) {
        let _ = self.tx.send(Arc::new(ev)).await;
    }
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Assistant text of every round, concatenated.
    pub final_text: String,
    /// Full history including this turn's assistant and tool messages.
    pub messages: Vec<ChatMessage>,
    /// Model round trips made.
    pub rounds: usize,
    pub stop: StopReason,
}

struct TurnSetup {
    client: OpenAIChatCompletionsClient,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    tool_ctx: ToolContext,
    registry: Arc<ToolRegistry>,
}

/// Runs one user turn: model rounds until a reply without tool calls or
/// until `config.max_rounds` is reached.
///
/// Hitting the round limit is not an error. The outcome then carries
/// `StopReason::RoundLimitExceeded` and the reply ends with
/// [`ROUND_LIMIT_NOTICE`].
///
/// # Errors
/// Returns an error (after emitting `AgentEvent::Error`) if the client
/// cannot be built, a request fails or the stream breaks, and an
/// `InterruptedError` (after `AgentEvent::Interrupted`) on Ctrl+C.
pub async fn run_turn(
    messages: Vec<ChatMessage>,
    config: &Config,
    options: &AgentOptions,
    tx: AgentEventTx,
) -> Result<TurnOutcome> {
    let sender = EventSender::new(tx);
    sender.send_important(AgentEvent::TurnStarted).await;

    let setup = match build_turn_setup(config, options) {
        Ok(setup) => setup,
        Err(err) => return Err(emit_error_async(err, &sender).await),
    };

    let max_rounds = config.max_rounds.max(1);
    let mut messages = messages;
    let mut final_text = String::new();

    for round in 1..=max_rounds {
        ensure_not_interrupted(&sender).await?;
        sender
            .send_important(AgentEvent::RoundStarted { round })
            .await;

        let window = history_window(&messages, config.history_window);
        tracing::debug!(round, sent = window.len(), total = messages.len(), "requesting model");
        let stream = request_stream(&setup, window, &sender).await?;
        let (text, calls) = consume_stream(stream, &sender).await?;

        final_text.push_str(&text);
        if !text.is_empty() {
            sender
                .send_important(AgentEvent::AssistantCompleted { text: text.clone() })
                .await;
        }

        if calls.is_empty() {
            messages.push(ChatMessage::assistant(text));
            return Ok(finish_turn(final_text, messages, round, StopReason::Completed, &sender).await);
        }

        tracing::debug!(round, calls = calls.len(), "executing tool calls");
        messages.push(ChatMessage::assistant_tool_calls(&text, calls.clone()));
        let outputs = execute_tools(&calls, &setup.tool_ctx, &setup.registry, &sender).await;
        for (call, output) in calls.iter().zip(outputs) {
            messages.push(ChatMessage::tool_result(&call.id, output.to_message()));
        }
    }

    tracing::warn!(max_rounds, "round limit reached with tool calls still pending");
    final_text.push_str(ROUND_LIMIT_NOTICE);
    sender
        .send_important(AgentEvent::AssistantDelta {
            text: ROUND_LIMIT_NOTICE.to_string(),
        })
        .await;
    Ok(finish_turn(
        final_text,
        messages,
        max_rounds,
        StopReason::RoundLimitExceeded,
        &sender,
    )
    .await)
}

/// Runs one turn on a fresh history and returns the reply text.
///
/// Events are drained and discarded.
///
/// # Errors
/// Same as [`run_turn`].
pub async fn simple_ask(prompt: &str, config: &Config, options: &AgentOptions) -> Result<String> {
    let (tx, mut rx) = create_event_channel();
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let outcome = run_turn(vec![ChatMessage::user(prompt)], config, options, tx).await;
    let _ = drain.await;
    Ok(outcome?.final_text)
}

fn build_turn_setup(config: &Config, options: &AgentOptions) -> Result<TurnSetup> {
    let base_url = resolve_base_url(
        Some(&config.provider.base_url),
        BASE_URL_ENV,
        Config::DEFAULT_BASE_URL,
    )?;
    let client = OpenAIChatCompletionsClient::new(OpenAIChatCompletionsConfig {
        api_key: resolve_api_key(config.provider.api_key.as_deref(), API_KEY_ENV),
        base_url,
        model: config.model.clone(),
        max_tokens: Some(config.max_tokens),
        timeout: config.request_timeout(),
    })?;

    let root = options
        .root
        .canonicalize()
        .unwrap_or_else(|_| options.root.clone());
    let skills = load_skills(&options.home.join(paths::SKILLS_DIR)).skills;
    let system_prompt = build_system_prompt(config.system_prompt.as_deref(), &root, &skills)?;

    let tool_ctx =
        ToolContext::new(root, config.tool_timeout()).with_home(options.home.clone());

    Ok(TurnSetup {
        client,
        system_prompt,
        tools: options.registry.export_schema(),
        tool_ctx,
        registry: Arc::clone(&options.registry),
    })
}

async fn finish_turn(
    final_text: String,
    messages: Vec<ChatMessage>,
    rounds: usize,
    stop: StopReason,
    sender: &EventSender,
) -> TurnOutcome {
    sender
        .send_important(AgentEvent::TurnCompleted {
            final_text: final_text.clone(),
            messages: messages.clone(),
            stop,
        })
        .await;
    TurnOutcome {
        final_text,
        messages,
        rounds,
        stop,
    }
}

/// Trailing `window` messages of the history; 0 sends everything.
///
/// A window that would open on a tool result is widened back to the
/// assistant message that issued the call.
fn history_window(messages: &[ChatMessage], window: usize) -> &[ChatMessage] {
    if window == 0 || messages.len() <= window {
        return messages;
    }
    let mut start = messages.len() - window;
    while start > 0 && messages[start].role == Role::Tool {
        start -= 1;
    }
    &messages[start..]
}

/// Sends an error event and returns the original error.
///
/// `ProviderError` keeps its kind and details; anything else is `Internal`.
async fn emit_error_async(err: anyhow::Error, sender: &EventSender) -> anyhow::Error {
    let event = if let Some(provider_err) = err.downcast_ref::<ProviderError>() {
        AgentEvent::Error {
            kind: provider_err.kind.clone().into(),
            message: provider_err.message.clone(),
            details: provider_err.details.clone(),
        }
    } else {
        AgentEvent::Error {
            kind: ErrorKind::Internal,
            message: format!("{err:#}"),
            details: None,
        }
    };
    sender.send_important(event).await;
    err
}

async fn ensure_not_interrupted(sender: &EventSender) -> Result<()> {
    if interrupt::is_interrupted() {
        sender.send_important(AgentEvent::Interrupted).await;
        return Err(InterruptedError.into());
    }
    Ok(())
}

async fn request_stream(
    setup: &TurnSetup,
    messages: &[ChatMessage],
    sender: &EventSender,
) -> Result<ProviderStream> {
    let result = tokio::select! {
        biased;
        () = interrupt::wait_for_interrupt() => {
            sender.send_important(AgentEvent::Interrupted).await;
            return Err(InterruptedError.into());
        }
        result = setup.client.send_messages_stream(
            messages,
            &setup.tools,
            Some(&setup.system_prompt),
        ) => result,
    };
    match result {
        Ok(stream) => Ok(stream),
        Err(err) => Err(emit_error_async(err, sender).await),
    }
}

/// Reads one streamed reply: forwards text as it arrives and returns the
/// round text plus the finalized tool calls.
async fn consume_stream(
    mut stream: ProviderStream,
    sender: &EventSender,
) -> Result<(String, Vec<ToolCallRecord>)> {
    let mut text = String::new();
    let mut calls = ToolCallAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            () = interrupt::wait_for_interrupt() => {
                sender.send_important(AgentEvent::Interrupted).await;
                return Err(InterruptedError.into());
            }
            next = stream.next() => next,
        };

        let event = match next {
            None => break,
            Some(Ok(event)) => event,
            Some(Err(err)) => return Err(emit_error_async(err.into(), sender).await),
        };

        match event {
            StreamEvent::ContentDelta { text: delta } => {
                if delta.is_empty() {
                    continue;
                }
                text.push_str(&delta);
                sender
                    .send_important(AgentEvent::AssistantDelta { text: delta })
                    .await;
            }
            StreamEvent::ToolCallFragment(fragment) => calls.push(fragment),
            StreamEvent::Finished { finish_reason } => {
                tracing::debug!(%finish_reason, "model finished");
            }
            StreamEvent::Usage(usage) => {
                sender
                    .send_important(AgentEvent::UsageUpdate {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    })
                    .await;
            }
            StreamEvent::Error {
                error_type,
                message,
            } => {
                let err = ProviderError::api_error(&error_type, &message);
                return Err(emit_error_async(err.into(), sender).await);
            }
            StreamEvent::Unknown { .. } => {}
            StreamEvent::Done => break,
        }
    }

    Ok((text, calls.finalize()))
}

/// Decodes call arguments; anything but a JSON object becomes `{}`.
fn decode_arguments(call: &ToolCallRecord) -> Value {
    if call.arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            tracing::warn!(tool = %call.name, id = %call.id, "tool arguments are not an object; using an empty object");
            Value::Object(Map::new())
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, id = %call.id, error = %e, "tool arguments are not valid JSON; using an empty object");
            Value::Object(Map::new())
        }
    }
}

/// Executes one round of tool calls concurrently.
///
/// `ToolStarted` events go out in request order before anything is
/// spawned; `ToolCompleted` events follow completion order. The returned
/// outputs are in request order regardless of timing.
async fn execute_tools(
    calls: &[ToolCallRecord],
    ctx: &ToolContext,
    registry: &Arc<ToolRegistry>,
    sender: &EventSender,
) -> Vec<ToolOutput> {
    let mut join_set: JoinSet<(usize, ToolOutput)> = JoinSet::new();
    let mut slots: Vec<Option<ToolOutput>> = vec![None; calls.len()];

    for (index, call) in calls.iter().enumerate() {
        let input = decode_arguments(call);
        sender
            .send_important(AgentEvent::ToolStarted {
                id: call.id.clone(),
                name: call.name.clone(),
                input: input.clone(),
            })
            .await;

        let registry = Arc::clone(registry);
        let ctx = ctx.clone();
        let name = call.name.clone();
        join_set.spawn(async move {
            let output = registry.execute(&name, &input, &ctx).await;
            (index, output)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, output)) => {
                let call = &calls[index];
                tracing::debug!(tool = %call.name, id = %call.id, success = output.success, "tool finished");
                sender
                    .send_important(AgentEvent::ToolCompleted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: output.clone(),
                    })
                    .await;
                slots[index] = Some(output);
            }
            Err(e) => tracing::warn!(error = %e, "tool task failed"),
        }
    }

    let mut outputs = Vec::with_capacity(calls.len());
    for (call, slot) in calls.iter().zip(slots) {
        let output = match slot {
            Some(output) => output,
            None => {
                let output = ToolOutput::failure(
                    codes::PANIC,
                    format!("Tool '{}' did not complete", call.name),
                );
                sender
                    .send_important(AgentEvent::ToolCompleted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: output.clone(),
                    })
                    .await;
                output
            }
        };
        outputs.push(output);
    }
    outputs
}
