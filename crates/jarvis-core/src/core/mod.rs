//! Core module: UI-agnostic domain and runtime.
//!
//! This module contains:
//! - `events`: Agent event types and the tool result envelope
//! - `tool_calls`: Merges streamed tool-call fragments into records
//! - `interrupt`: Ctrl+C handling for cancelling a running turn
//! - `agent`: The bounded model/tool loop and event channels

pub mod agent;
pub mod events;
pub mod interrupt;
pub mod tool_calls;
