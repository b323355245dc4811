//! Tools command handlers.

use std::fmt::Write as _;

use anyhow::Result;
use jarvis_core::tools::{Tool, ToolLayer, ToolRegistry};
use serde_json::Value;

const LAYERS: [ToolLayer; 3] = [ToolLayer::Atomic, ToolLayer::Generative, ToolLayer::Custom];

pub fn list() {
    print!("{}", render_list(&ToolRegistry::builtins()));
}

pub fn info(name: &str) -> Result<()> {
    let registry = ToolRegistry::builtins();
    let Some(tool) = registry.get(name) else {
        let mut available = registry.names();
        available.sort_unstable();
        anyhow::bail!(
            "Unknown tool: {name}. Available tools: {}",
            available.join(", ")
        );
    };
    print!("{}", render_info(tool));
    Ok(())
}

/// Tools grouped by layer, one line each with the first sentence of the
/// description.
fn render_list(registry: &ToolRegistry) -> String {
    let width = registry
        .names()
        .iter()
        .map(|n| n.len())
        .max()
        .unwrap_or_default();

    let mut out = String::new();
    for layer in LAYERS {
        let tools: Vec<&Tool> = registry.iter().filter(|t| t.layer == layer).collect();
        if tools.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "{layer}:");
        for tool in tools {
            let _ = writeln!(
                out,
                "  {:<width$}  {}",
                tool.name(),
                summary(&tool.definition.description)
            );
        }
    }
    out
}

/// Full description plus parameters; required ones are marked `*`.
fn render_info(tool: &Tool) -> String {
    let schema = &tool.definition.input_schema;
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", tool.name(), tool.layer);
    let _ = writeln!(out, "\n{}\n", tool.definition.description);

    let properties = schema.get("properties").and_then(Value::as_object);
    match properties {
        Some(props) if !props.is_empty() => {
            let _ = writeln!(out, "Parameters (* = required):");
            for (name, prop) in props {
                let marker = if required.contains(&name.as_str()) { "*" } else { " " };
                let kind = prop.get("type").and_then(Value::as_str).unwrap_or("any");
                let description = prop
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let _ = writeln!(out, "  {marker} {name} ({kind}) {description}");
            }
        }
        _ => {
            let _ = writeln!(out, "No parameters.");
        }
    }
    out
}

fn summary(description: &str) -> &str {
    let first_line = description.lines().next().unwrap_or_default();
    match first_line.find(". ") {
        Some(end) => &first_line[..=end],
        None => first_line,
    }
}
