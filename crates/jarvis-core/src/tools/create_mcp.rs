//! MCP server scaffolding tool.
//!
//! Generates a standalone Cargo project under `mcp/<name>/` whose binary
//! answers MCP requests over stdio. Handlers start as stubs; like
//! `create_tool`, nothing here builds or runs the result.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, parse_input, validate_kebab_name};
use crate::config::paths;
use crate::core::events::{ToolOutput, codes};
use crate::prompts::render_template;

const CARGO_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/mcp_cargo.toml.jinja"
));
const MAIN_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/mcp_main.rs.jinja"
));
const README_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/mcp_readme.md.jinja"
));

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "create_mcp".to_string(),
        description: "Scaffold a standalone MCP server project (Rust, JSON-RPC over stdio) under \
            the Jarvis mcp directory, with one stub handler per tool. Existing projects are \
            never overwritten."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Kebab-case server name, e.g. notes-server"
                },
                "description": {
                    "type": "string",
                    "description": "What the server provides"
                },
                "tool_specs": {
                    "type": "array",
                    "description": "Tools the server exposes",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "parameters": {
                                "type": "object",
                                "description": "JSON Schema of the tool input"
                            }
                        },
                        "required": ["name", "description"]
                    }
                }
            },
            "required": ["name", "description", "tool_specs"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct McpInput {
    name: String,
    description: String,
    #[serde(default, alias = "tools")]
    tool_specs: Vec<McpToolSpec>,
}

#[derive(Debug, Deserialize)]
struct McpToolSpec {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
struct McpToolVars {
    name: String,
    description: String,
    name_literal: String,
    description_literal: String,
    description_comment: String,
    schema_literal: String,
    fn_name: String,
}

#[derive(Debug, Serialize)]
struct McpVars<'a> {
    name: &'a str,
    description: &'a str,
    description_toml: String,
    description_comment: String,
    tools: Vec<McpToolVars>,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: McpInput = match parse_input(input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    if let Err(out) = validate_kebab_name(&input.name) {
        return out;
    }
    let tools = match tool_vars(&input.tool_specs) {
        Ok(t) => t,
        Err(out) => return out,
    };

    let project_dir = ctx.home.join(paths::MCP_DIR).join(&input.name);
    if project_dir.exists() {
        return ToolOutput::failure(
            codes::ALREADY_EXISTS,
            format!("MCP project already exists: {}", project_dir.display()),
        );
    }

    let description = input.description.trim();
    let vars = McpVars {
        name: &input.name,
        description,
        // TOML basic strings accept JSON string escapes.
        description_toml: Value::String(description.to_string()).to_string(),
        description_comment: first_line(description),
        tools,
    };

    let files = [
        ("Cargo.toml", CARGO_TEMPLATE),
        ("src/main.rs", MAIN_TEMPLATE),
        ("README.md", README_TEMPLATE),
    ];
    let mut rendered = Vec::with_capacity(files.len());
    for (file, template) in files {
        match render_template(file, template, &vars) {
            Ok(content) => rendered.push((file, content)),
            Err(e) => {
                return ToolOutput::failure(
                    codes::IO_ERROR,
                    format!("Failed to render {file}: {e}"),
                );
            }
        }
    }

    if let Err(e) = write_project(&project_dir, &rendered) {
        return ToolOutput::failure(
            codes::IO_ERROR,
            format!("Failed to write MCP project to {}: {e}", project_dir.display()),
        );
    }

    let tool_names: Vec<&str> = vars.tools.iter().map(|t| t.name.as_str()).collect();
    let file_names: Vec<&str> = rendered.iter().map(|(f, _)| *f).collect();

    tracing::debug!(server = %input.name, path = %project_dir.display(), "scaffolded mcp server");
    ToolOutput::success(format!(
        "Created MCP server '{}' at {}\nFiles: {}\nTools: {}\nHandlers are stubs; implement \
         them and run `cargo build --release` in the project directory.",
        input.name,
        project_dir.display(),
        file_names.join(", "),
        if tool_names.is_empty() {
            "(none)".to_string()
        } else {
            tool_names.join(", ")
        }
    ))
    .with_metadata("server_name", input.name.as_str())
    .with_metadata("path", project_dir.display().to_string())
    .with_metadata("tools", tool_names)
    .with_metadata("files", file_names)
}

fn tool_vars(specs: &[McpToolSpec]) -> Result<Vec<McpToolVars>, ToolOutput> {
    let mut seen = HashSet::new();
    let mut tools = Vec::with_capacity(specs.len());

    for spec in specs {
        let name = spec.name.trim();
        if !is_tool_name(name) {
            return Err(ToolOutput::failure(
                codes::INVALID_INPUT,
                format!("Invalid MCP tool name '{name}': use [A-Za-z][A-Za-z0-9_-]*"),
            ));
        }
        let fn_name = format!("tool_{}", name.to_ascii_lowercase().replace('-', "_"));
        if !seen.insert(fn_name.clone()) {
            return Err(ToolOutput::failure(
                codes::INVALID_INPUT,
                format!("Duplicate MCP tool name '{name}'"),
            ));
        }

        let schema = match &spec.parameters {
            None | Some(Value::Null) => json!({"type": "object", "properties": {}}),
            Some(schema @ Value::Object(_)) => schema.clone(),
            Some(_) => {
                return Err(ToolOutput::failure(
                    codes::INVALID_INPUT,
                    format!("parameters of '{name}' must be a JSON Schema object"),
                ));
            }
        };

        let description = spec.description.trim();
        tools.push(McpToolVars {
            name: name.to_string(),
            description: description.to_string(),
            name_literal: format!("{name:?}"),
            description_literal: format!("{description:?}"),
            description_comment: first_line(description),
            schema_literal: format!("{:?}", schema.to_string()),
            fn_name,
        });
    }
    Ok(tools)
}

fn is_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    name.len() <= 64
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

fn write_project(dir: &Path, files: &[(&str, String)]) -> std::io::Result<()> {
    fs::create_dir_all(dir.join("src"))?;
    for (file, content) in files {
        fs::write(dir.join(file), content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(dir.path().to_path_buf(), None).with_home(dir.path().to_path_buf())
    }

    fn notes_input() -> Value {
        json!({
            "name": "notes-server",
            "description": "Personal notes: search and append",
            "tool_specs": [
                {
                    "name": "search_notes",
                    "description": "Find notes matching a query",
                    "parameters": {
                        "type": "object",
                        "properties": {"query": {"type": "string"}},
                        "required": ["query"]
                    }
                },
                {"name": "list-notes", "description": "List every note"}
            ]
        })
    }

    #[test]
    fn test_scaffolds_project_files() {
        let dir = TempDir::new().unwrap();
        let out = execute(&notes_input(), &ctx(&dir));

        assert!(out.is_ok(), "{out:?}");
        assert_eq!(out.metadata["tools"], json!(["search_notes", "list-notes"]));
        assert_eq!(
            out.metadata["files"],
            json!(["Cargo.toml", "src/main.rs", "README.md"])
        );

        let project = dir.path().join("mcp/notes-server");
        let manifest = fs::read_to_string(project.join("Cargo.toml")).unwrap();
        assert!(manifest.contains("name = \"notes-server\""));
        assert!(manifest.contains("description = \"Personal notes: search and append\""));
        assert!(manifest.contains("serde_json = \"1\""));

        let main = fs::read_to_string(project.join("src/main.rs")).unwrap();
        assert!(main.contains("\"initialize\" =>"));
        assert!(main.contains("\"tools/list\" =>"));
        assert!(main.contains("\"tools/call\" =>"));
        assert!(main.contains("\"search_notes\" => tool_search_notes(arguments),"));
        assert!(main.contains("\"list-notes\" => tool_list_notes(arguments),"));
        assert!(main.contains("fn tool_search_notes(arguments: &Value)"));
        assert!(main.contains(r#"\"required\":[\"query\"]"#));

        let readme = fs::read_to_string(project.join("README.md")).unwrap();
        assert!(readme.starts_with("# notes-server\n"));
        assert!(readme.contains("- `list-notes`: List every note"));
    }

    #[test]
    fn test_missing_parameters_default_to_empty_object_schema() {
        let dir = TempDir::new().unwrap();
        let out = execute(&notes_input(), &ctx(&dir));
        assert!(out.is_ok());

        let main = fs::read_to_string(dir.path().join("mcp/notes-server/src/main.rs")).unwrap();
        let list_entry = main
            .split("\"list-notes\",")
            .nth(1)
            .and_then(|rest| rest.split("),").next())
            .unwrap();
        assert!(list_entry.contains(r#"\"properties\":{}"#), "{list_entry}");
        assert!(list_entry.contains(r#"\"type\":\"object\""#), "{list_entry}");
    }

    #[test]
    fn test_existing_project_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("mcp/notes-server");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("README.md"), "mine").unwrap();

        let out = execute(&notes_input(), &ctx(&dir));

        assert_eq!(out.error_info().unwrap().0, "already_exists");
        assert_eq!(fs::read_to_string(project.join("README.md")).unwrap(), "mine");
        assert!(!project.join("Cargo.toml").exists());
    }

    #[test]
    fn test_rejects_bad_names() {
        let dir = TempDir::new().unwrap();

        let out = execute(
            &json!({"name": "Notes", "description": "d", "tool_specs": []}),
            &ctx(&dir),
        );
        assert_eq!(out.error_info().unwrap().0, "invalid_input");

        let out = execute(
            &json!({
                "name": "notes",
                "description": "d",
                "tool_specs": [{"name": "x\"); evil(); (\"", "description": "d"}]
            }),
            &ctx(&dir),
        );
        assert_eq!(out.error_info().unwrap().0, "invalid_input");

        let out = execute(
            &json!({
                "name": "notes",
                "description": "d",
                "tool_specs": [
                    {"name": "get-item", "description": "a"},
                    {"name": "get_item", "description": "b"}
                ]
            }),
            &ctx(&dir),
        );
        assert_eq!(out.error_info().unwrap().0, "invalid_input");
        assert!(!dir.path().join("mcp/notes").exists());
    }

    #[test]
    fn test_server_without_tools() {
        let dir = TempDir::new().unwrap();
        let out = execute(
            &json!({"name": "empty", "description": "Nothing yet", "tool_specs": []}),
            &ctx(&dir),
        );

        assert!(out.is_ok(), "{out:?}");
        let readme = fs::read_to_string(dir.path().join("mcp/empty/README.md")).unwrap();
        assert!(readme.contains("No tools yet."));
    }
}
