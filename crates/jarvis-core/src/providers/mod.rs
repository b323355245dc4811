//! LLM provider implementations.

pub mod openai;
pub mod shared;

pub use shared::{
    CallFragment, ChatMessage, ProviderError, ProviderErrorKind, ProviderResult, ProviderStream,
    Role, StreamEvent, ToolCallRecord, Usage, resolve_api_key, resolve_base_url,
};
