//! Exec command handler.

use std::path::Path;

use anyhow::{Context, Result};
use jarvis_core::config::Config;
use jarvis_core::core::agent::AgentOptions;

use crate::modes;

pub async fn run(root: &Path, prompt: &str, config: &Config) -> Result<()> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let options = AgentOptions::new(root.to_path_buf());
    modes::exec::run_exec(prompt, config, &options)
        .await
        .context("execute prompt")?;

    Ok(())
}
