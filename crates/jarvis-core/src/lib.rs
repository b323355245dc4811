pub mod config;
pub mod core;
pub mod prompts;
pub mod providers;
pub mod skills;
pub mod tools;
