//! OpenAI-compatible Chat Completions client and stream decoder.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Context as _, Result};
use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures_util::Stream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::providers::shared::USER_AGENT;
use crate::providers::{
    CallFragment, ChatMessage, ProviderError, ProviderErrorKind, ProviderResult, ProviderStream,
    StreamEvent, Usage,
};
use crate::tools::ToolDefinition;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI-compatible chat completions configuration.
#[derive(Debug, Clone)]
pub struct OpenAIChatCompletionsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    /// Applied to connecting and to each read of the response stream.
    pub timeout: Duration,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAIChatCompletionsClient {
    config: OpenAIChatCompletionsConfig,
    http: reqwest::Client,
}

impl OpenAIChatCompletionsClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: OpenAIChatCompletionsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .no_proxy()
            .build()
            .context("build chat completions HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.config.base_url, CHAT_COMPLETIONS_PATH)
    }

    /// Sends one streaming request and returns the decoded event stream.
    ///
    /// A non-success status is not retried: the full body is read and
    /// returned as a `ProviderError`.
    ///
    /// # Errors
    /// Returns a `ProviderError` on connect failure or non-success status.
    pub async fn send_messages_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system: Option<&str>,
    ) -> Result<ProviderStream> {
        let request = ChatCompletionRequest::new(&self.config, messages, tools, system);
        let headers = build_headers(self.config.api_key.as_deref());

        let response = self
            .http
            .post(self.endpoint())
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body).into());
        }

        Ok(Box::pin(ChatCompletionsSseParser::new(
            response.bytes_stream(),
        )))
    }
}

fn build_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
    {
        headers.insert(AUTHORIZATION, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::network(format!("Connection failed: {e}"))
    } else {
        ProviderError::network(format!("Request error: {e}"))
    }
}

// ============================================================================
// Request wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

/// `{type: "function", function: {name, description, parameters}}`
#[derive(Debug, Serialize)]
struct ChatToolDefinition {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for ChatToolDefinition {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }
}

impl From<&ChatMessage> for ChatCompletionMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
            msg.tool_calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    tool_type: "function",
                    function: ChatToolCallFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });

        Self {
            role: msg.role.as_str(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl ChatCompletionRequest {
    fn new(
        config: &OpenAIChatCompletionsConfig,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system: Option<&str>,
    ) -> Self {
        let mut out_messages = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system
            && !prompt.trim().is_empty()
        {
            out_messages.push(ChatCompletionMessage {
                role: "system",
                content: Some(prompt.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        out_messages.extend(messages.iter().map(ChatCompletionMessage::from));

        let tool_defs =
            (!tools.is_empty()).then(|| tools.iter().map(ChatToolDefinition::from).collect());

        Self {
            model: config.model.clone(),
            stream: true,
            messages: out_messages,
            tools: tool_defs,
            max_tokens: config.max_tokens,
        }
    }
}

// ============================================================================
// Stream decoding
// ============================================================================

/// Appends a blank line at EOF so a final frame without a trailing
/// separator is still dispatched by the SSE parser.
struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            other => other,
        }
    }
}

/// Decodes a chat completions SSE body into `StreamEvent`s.
///
/// Each `data:` payload is decoded on its own. A payload that is not valid
/// JSON becomes `StreamEvent::Unknown` and decoding continues. The stream
/// ends after the `[DONE]` sentinel or at EOF, whichever comes first.
pub struct ChatCompletionsSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

impl<S> ChatCompletionsSseParser<S> {
    pub fn new<E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn handle_event_data(&mut self, data: &str) {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed == DONE_SENTINEL {
            self.done = true;
            self.pending.push_back(StreamEvent::Done);
            return;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => self.handle_chunk(&value),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed chat completions frame");
                self.pending.push_back(StreamEvent::Unknown {
                    raw: trimmed.to_string(),
                });
            }
        }
    }

    fn handle_chunk(&mut self, value: &Value) {
        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            self.pending.push_back(StreamEvent::Error {
                error_type,
                message,
            });
            return;
        }

        // Usage-only chunks carry an empty choices array.
        let first_choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first());

        if let Some(choice) = first_choice {
            if let Some(delta) = choice.get("delta") {
                self.process_delta(delta);
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.pending.push_back(StreamEvent::Finished {
                    finish_reason: reason.to_string(),
                });
            }
        }

        if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
            self.pending.push_back(StreamEvent::Usage(parse_usage(usage)));
        }
    }

    fn process_delta(&mut self, delta: &Value) {
        if let Some(text) = delta.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            self.pending.push_back(StreamEvent::ContentDelta {
                text: text.to_string(),
            });
        }

        let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) else {
            return;
        };

        for tool_call in tool_calls {
            let index = tool_call
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(0);
            let function = tool_call.get("function").unwrap_or(&Value::Null);
            let non_empty = |v: Option<&Value>| {
                v.and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            self.pending
                .push_back(StreamEvent::ToolCallFragment(CallFragment {
                    index,
                    id: non_empty(tool_call.get("id")),
                    name: non_empty(function.get("name")),
                    arguments: function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }));
        }
    }
}

impl<S, E> Stream for ChatCompletionsSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => self.handle_event_data(&event.data),
                Poll::Ready(Some(Err(EventStreamError::Transport(e)))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ProviderError::network(format!(
                        "Stream read failed: {e}"
                    )))));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ProviderError::new(
                        ProviderErrorKind::Parse,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn parse_usage(usage: &Value) -> Usage {
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
    }
}
