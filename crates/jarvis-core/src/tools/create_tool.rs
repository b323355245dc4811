//! Tool source generator.
//!
//! Renders a Rust source file for a new `Tool` from a fixed template and
//! writes it to `tools/<name>.rs` under the Jarvis home. The supplied body
//! is inserted verbatim: nothing compiles, lints or sandboxes it, and the
//! file is never loaded by this process. Whoever wires it into a build owns
//! its correctness and safety.

use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, parse_input};
use crate::config::paths;
use crate::core::events::{ToolOutput, codes};
use crate::prompts::render_template;

const TOOL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/tool.rs.jinja"
));

const BODY_INDENT: &str = "        ";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "create_tool".to_string(),
        description: "Generate Rust source for a new tool and save it under the Jarvis tools \
            directory. `code` becomes the body of `async fn execute(input: Value, ctx: \
            ToolContext) -> ToolOutput` as written. The code is NOT compiled, checked or \
            sandboxed, and the tool is not available until someone builds it in."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "snake_case tool name, e.g. word_count"
                },
                "description": {
                    "type": "string",
                    "description": "What the tool does, shown to the model"
                },
                "parameters": {
                    "type": "object",
                    "description": "JSON Schema of the tool input"
                },
                "code": {
                    "type": "string",
                    "description": "Rust statements forming the execute body; must evaluate to a ToolOutput"
                }
            },
            "required": ["name", "description", "code"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct CreateToolInput {
    name: String,
    description: String,
    #[serde(default, alias = "parameter_schema")]
    parameters: Option<Value>,
    #[serde(alias = "code_body")]
    code: String,
}

#[derive(Debug, Serialize)]
struct ToolVars<'a> {
    name: &'a str,
    struct_name: &'a str,
    description_comment: String,
    description_literal: String,
    schema_literal: String,
    body: String,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: CreateToolInput = match parse_input(input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    if !is_snake_case(&input.name) {
        return ToolOutput::failure(
            codes::INVALID_INPUT,
            format!(
                "Invalid tool name '{}': use snake_case ([a-z][a-z0-9_]*, max 64 chars)",
                input.name
            ),
        );
    }
    let schema = match normalize_schema(input.parameters) {
        Ok(s) => s,
        Err(out) => return out,
    };
    let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    let struct_name = format!("{}Tool", camel_case(&input.name));
    let description = input.description.trim();
    let vars = ToolVars {
        name: &input.name,
        struct_name: &struct_name,
        description_comment: description.lines().next().unwrap_or_default().to_string(),
        description_literal: format!("{description:?}"),
        schema_literal: raw_string_literal(&schema_text),
        body: indent(&input.code, BODY_INDENT),
    };

    let source = match render_template("tool.rs", TOOL_TEMPLATE, &vars) {
        Ok(s) => s,
        Err(e) => {
            return ToolOutput::failure(codes::IO_ERROR, format!("Failed to render tool: {e}"));
        }
    };

    let tools_dir = ctx.home.join(paths::TOOLS_DIR);
    let path = tools_dir.join(format!("{}.rs", input.name));
    if let Err(e) = fs::create_dir_all(&tools_dir).and_then(|()| fs::write(&path, source)) {
        return ToolOutput::failure(
            codes::IO_ERROR,
            format!("Failed to write {}: {e}", path.display()),
        );
    }

    tracing::debug!(tool = %input.name, path = %path.display(), "generated tool source");
    ToolOutput::success(format!(
        "Generated {struct_name} at {}\nThe source is unreviewed and not loaded; build it into \
         a registry to use it.",
        path.display()
    ))
    .with_metadata("tool_name", input.name.as_str())
    .with_metadata("path", path.display().to_string())
    .with_metadata("struct_name", struct_name.as_str())
}

fn is_snake_case(name: &str) -> bool {
    let mut chars = name.chars();
    name.len() <= 64
        && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Accepts a schema object or its JSON text; absent means no parameters.
fn normalize_schema(raw: Option<Value>) -> Result<Value, ToolOutput> {
    let schema = match raw {
        None | Some(Value::Null) => json!({"type": "object", "properties": {}}),
        Some(Value::String(text)) => serde_json::from_str(&text).map_err(|e| {
            ToolOutput::failure(codes::INVALID_INPUT, format!("parameters is not valid JSON: {e}"))
        })?,
        Some(other) => other,
    };
    if !schema.is_object() {
        return Err(ToolOutput::failure(
            codes::INVALID_INPUT,
            "parameters must be a JSON Schema object",
        ));
    }
    Ok(schema)
}

/// `word_count` -> `WordCount`
fn camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

/// Smallest `r#..#"..."#..#` literal that can hold `text`.
fn raw_string_literal(text: &str) -> String {
    let mut hashes = 0;
    while text.contains(&format!("\"{}", "#".repeat(hashes))) {
        hashes += 1;
    }
    let fence = "#".repeat(hashes);
    format!("r{fence}\"{text}\"{fence}")
}

fn indent(code: &str, prefix: &str) -> String {
    code.trim_end()
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
