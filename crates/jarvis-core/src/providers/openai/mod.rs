//! OpenAI-compatible endpoints.

pub mod chat_completions;

pub use chat_completions::{OpenAIChatCompletionsClient, OpenAIChatCompletionsConfig};
