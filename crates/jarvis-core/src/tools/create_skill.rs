//! Skill scaffolding tool.
//!
//! Writes `skills/<name>/SKILL.md` (plus optional scripts) under the Jarvis
//! home. The skill is not registered live; it shows up in the system prompt
//! of the next turn.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, parse_input, validate_kebab_name};
use crate::config::paths;
use crate::core::events::{ToolOutput, codes};
use crate::prompts::render_template;

const SKILL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/skill.md.jinja"
));

/// Script extensions that are made executable.
const EXECUTABLE_EXTENSIONS: &[&str] = &["sh", "bash", "py", "rb", "pl", "js"];

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "create_skill".to_string(),
        description: "Save a reusable skill: a SKILL.md with instructions plus optional helper \
            scripts, stored under the Jarvis skills directory. The skill is listed to the \
            assistant from the next turn on."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Kebab-case skill name, e.g. weekly-report"
                },
                "description": {
                    "type": "string",
                    "description": "One line saying when to use the skill"
                },
                "instructions": {
                    "type": "string",
                    "description": "Markdown instructions to follow when the skill applies"
                },
                "scripts": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Optional map of script filename to file content"
                }
            },
            "required": ["name", "description", "instructions"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct SkillInput {
    name: String,
    description: String,
    instructions: String,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SkillVars<'a> {
    name: &'a str,
    description_yaml: String,
    display_name: String,
    instructions: &'a str,
    scripts: Vec<&'a str>,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: SkillInput = match parse_input(input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    if let Err(out) = validate_kebab_name(&input.name) {
        return out;
    }
    let description = input.description.trim();
    if description.is_empty() {
        return ToolOutput::failure(codes::INVALID_INPUT, "description cannot be empty");
    }
    if let Some(bad) = input.scripts.keys().find(|f| !is_plain_filename(f)) {
        return ToolOutput::failure(
            codes::INVALID_INPUT,
            format!("Invalid script filename '{bad}': use a plain file name"),
        );
    }

    let skill_dir = ctx.home.join(paths::SKILLS_DIR).join(&input.name);
    let vars = SkillVars {
        name: &input.name,
        // A JSON string literal is valid YAML and survives colons and quotes.
        description_yaml: Value::String(description.replace('\n', " ")).to_string(),
        display_name: display_name(&input.name),
        instructions: input.instructions.trim(),
        scripts: input.scripts.keys().map(String::as_str).collect(),
    };
    let manifest = match render_template("skill.md", SKILL_TEMPLATE, &vars) {
        Ok(m) => m,
        Err(e) => {
            return ToolOutput::failure(codes::IO_ERROR, format!("Failed to render SKILL.md: {e}"));
        }
    };

    if let Err(e) = write_skill(&skill_dir, &manifest, &input.scripts) {
        return ToolOutput::failure(
            codes::IO_ERROR,
            format!("Failed to write skill to {}: {e}", skill_dir.display()),
        );
    }

    let mut files = vec!["SKILL.md".to_string()];
    files.extend(input.scripts.keys().map(|f| format!("scripts/{f}")));
    let scripts: Vec<Value> = input
        .scripts
        .keys()
        .map(|f| Value::String(format!("scripts/{f}")))
        .collect();

    tracing::debug!(skill = %input.name, path = %skill_dir.display(), "created skill");
    ToolOutput::success(format!(
        "Created skill '{}' at {}\nFiles: {}\nIt will be listed from the next turn.",
        input.name,
        skill_dir.display(),
        files.join(", ")
    ))
    .with_metadata("skill_name", input.name.as_str())
    .with_metadata("path", skill_dir.display().to_string())
    .with_metadata("scripts", scripts)
}

fn write_skill(
    skill_dir: &Path,
    manifest: &str,
    scripts: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    fs::create_dir_all(skill_dir)?;
    fs::write(skill_dir.join("SKILL.md"), manifest)?;

    if scripts.is_empty() {
        return Ok(());
    }
    let scripts_dir = skill_dir.join("scripts");
    fs::create_dir_all(&scripts_dir)?;
    for (filename, content) in scripts {
        let path = scripts_dir.join(filename);
        fs::write(&path, content)?;
        if is_executable_script(filename) {
            make_executable(&path)?;
        }
    }
    Ok(())
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn is_executable_script(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| EXECUTABLE_EXTENSIONS.contains(&ext))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// `weekly-report` -> `Weekly Report`
fn display_name(name: &str) -> String {
    name.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
