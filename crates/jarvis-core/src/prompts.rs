//! Prompt and code templates (`MiniJinja`).

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

use crate::skills::Skill;

/// System prompt template: persona, rules and discovered skills.
pub const SYSTEM_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/system_prompt.md"
));

/// Persona used when the config sets no `system_prompt`.
pub const DEFAULT_PERSONA: &str = "You are Jarvis, a personal AI assistant running on the \
user's own machine. You can read and write files, run shell commands and make HTTP requests \
through your tools, and you can create new skills, tools and MCP servers when a task calls \
for a reusable capability.";

#[derive(Debug, Serialize)]
struct PromptSkill {
    name: String,
    description: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct SystemPromptVars {
    persona: String,
    cwd: String,
    skills: Vec<PromptSkill>,
}

/// Renders the system prompt for one turn.
///
/// # Errors
/// Returns an error if the template fails to render.
pub fn build_system_prompt(persona: Option<&str>, cwd: &Path, skills: &[Skill]) -> Result<String> {
    let persona = persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PERSONA);

    let vars = SystemPromptVars {
        persona: persona.to_string(),
        cwd: cwd.display().to_string(),
        skills: skills
            .iter()
            .map(|skill| PromptSkill {
                name: skill.name.clone(),
                description: skill.description.clone(),
                path: skill.file_path.display().to_string(),
            })
            .collect(),
    };

    let rendered = render_template("system_prompt", SYSTEM_PROMPT_TEMPLATE, &vars)
        .context("render system prompt")?;
    Ok(rendered.replace("\r\n", "\n").trim().to_string())
}

/// Renders a template with strict undefined checks and no escaping.
///
/// Block tags swallow their own line, and the trailing newline of the
/// source is kept so generated files end with one.
///
/// # Errors
/// Returns the template error on a syntax problem or undefined variable.
pub fn render_template<S: Serialize>(
    name: &str,
    source: &str,
    vars: S,
) -> std::result::Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.add_template(name, source)?;
    env.get_template(name)?.render(vars)
}
