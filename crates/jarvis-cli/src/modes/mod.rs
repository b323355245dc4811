//! Runtime execution modes.
//!
//! - `exec`: streaming stdout/stderr renderer, shared by one-shot exec
//!   and the line-based chat loop

pub mod exec;
