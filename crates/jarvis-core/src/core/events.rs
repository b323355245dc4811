//! Agent event types for streaming renderers.
//!
//! This module defines the contract between the agent loop and whatever
//! consumes its output. Events are serializable so a renderer can forward
//! them as JSON lines.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::providers::{ChatMessage, ProviderErrorKind};

/// Events emitted by the agent during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Turn has started processing.
    TurnStarted,

    /// A model round trip is about to be sent (1-based).
    RoundStarted { round: usize },

    /// Incremental text chunk from the assistant.
    AssistantDelta { text: String },

    /// Text of one finished model round.
    AssistantCompleted { text: String },

    /// A tool invocation is about to run with its decoded input.
    ToolStarted {
        id: String,
        name: String,
        input: Value,
    },

    /// A tool invocation has completed.
    ToolCompleted {
        id: String,
        name: String,
        result: ToolOutput,
    },

    /// Token usage reported by the endpoint.
    UsageUpdate {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// An error occurred and the turn is aborted.
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Execution was interrupted by the user.
    Interrupted,

    /// Turn finished with final result.
    TurnCompleted {
        /// Assistant text of every round, concatenated.
        final_text: String,
        /// Updated history (includes assistant replies and tool results).
        messages: Vec<ChatMessage>,
        stop: StopReason,
    },
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model replied without requesting tools.
    Completed,
    /// The round limit was hit while the model kept requesting tools.
    RoundLimitExceeded,
}

/// Error categories for `AgentEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection failure or timeout
    Network,
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Response stream broke
    Parse,
    /// API-level error from the endpoint
    ApiError,
    /// Internal/unknown error
    Internal,
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::Network => ErrorKind::Network,
            ProviderErrorKind::HttpStatus => ErrorKind::HttpStatus,
            ProviderErrorKind::Parse => ErrorKind::Parse,
            ProviderErrorKind::ApiError => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::ApiError => write!(f, "api_error"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Error codes carried by failed `ToolOutput`s.
pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const NOT_FOUND: &str = "not_found";
    pub const NOT_A_FILE: &str = "not_a_file";
    pub const ALREADY_EXISTS: &str = "already_exists";
    pub const SECURITY_DENIED: &str = "security_denied";
    pub const TIMEOUT: &str = "timeout";
    pub const EXIT_STATUS: &str = "exit_status";
    pub const HTTP_STATUS: &str = "http_status";
    pub const IO_ERROR: &str = "io_error";
    pub const SPAWN_ERROR: &str = "spawn_error";
    pub const REQUEST_ERROR: &str = "request_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const PANIC: &str = "panic";
}

/// Result of one tool invocation.
///
/// A failure keeps whatever output was produced (an HTTP error body, the
/// stdout of a failing command) so the model can diagnose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Error details for failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(ToolError {
                code: code.into(),
                message: message.into(),
            }),
            metadata: Map::new(),
        }
    }

    /// Replaces the output text, keeping the success flag and error.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    /// Returns the error code and message if this is a failure.
    pub fn error_info(&self) -> Option<(&str, &str)> {
        self.error
            .as_ref()
            .map(|e| (e.code.as_str(), e.message.as_str()))
    }

    /// Text fed back to the model as the tool-role message.
    ///
    /// Success is the raw output; failure is `Error: <reason>` followed by
    /// any output on the next line.
    pub fn to_message(&self) -> String {
        if self.success {
            return self.output.clone();
        }

        let reason = self
            .error
            .as_ref()
            .map_or("Unknown error", |e| e.message.as_str());
        if self.output.is_empty() {
            format!("Error: {reason}")
        } else {
            format!("Error: {reason}\n{}", self.output)
        }
    }
}
