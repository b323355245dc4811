//! Read file tool.
//!
//! Returns text content, optionally windowed to a 1-based inclusive line
//! range. Invalid UTF-8 is decoded lossily.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, parse_input, resolve_path, truncate_chars};
use crate::core::events::{ToolOutput, codes};

/// Characters returned before the content is cut.
const MAX_CHARS: usize = 100_000;

/// Accepts a line number given either as a number or a numeric string.
fn deserialize_optional_line<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected positive integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid line number: {s}"))),
        Some(_) => Err(D::Error::custom("expected number or numeric string")),
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "file_read".to_string(),
        description: "Read a text file. Supports ~ and $VAR in the path; relative paths \
            resolve against the working directory. Optionally return only lines \
            start_line..=end_line (1-based)."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based, inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (1-based, inclusive)"
                }
            },
            "required": ["path"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ReadInput {
    path: String,
    #[serde(default, deserialize_with = "deserialize_optional_line")]
    start_line: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_optional_line")]
    end_line: Option<usize>,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: ReadInput = match parse_input(input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    let path = resolve_path(&input.path, &ctx.root);
    let display = path.display().to_string();

    if !path.exists() {
        return ToolOutput::failure(codes::NOT_FOUND, format!("File not found: {display}"));
    }
    if !path.is_file() {
        return ToolOutput::failure(codes::NOT_A_FILE, format!("Not a file: {display}"));
    }

    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            return ToolOutput::failure(
                codes::IO_ERROR,
                format!("Failed to read {display}: {e}"),
            );
        }
    };
    let content = String::from_utf8_lossy(&bytes);

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let total_lines = lines.len();

    let mut output = ToolOutput::success(String::new())
        .with_metadata("path", display)
        .with_metadata("total_lines", total_lines);

    let text = if input.start_line.is_some() || input.end_line.is_some() {
        let start = input.start_line.unwrap_or(1).max(1);
        let end = input.end_line.unwrap_or(total_lines).min(total_lines);
        output = output.with_metadata("returned_lines", format!("{start}-{end}"));
        if start > end {
            String::new()
        } else {
            lines[start - 1..end].concat()
        }
    } else {
        content.into_owned()
    };

    output.output = match truncate_chars(&text, MAX_CHARS) {
        Some(head) => format!(
            "{head}\n\n... (truncated, total {} chars)",
            text.chars().count()
        ),
        None => text,
    };
    output
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(dir.path().to_path_buf(), None)
    }

    #[test]
    fn test_reads_whole_file_relative_to_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "one\ntwo\nthree\n").unwrap();

        let out = execute(&json!({"path": "notes.txt"}), &ctx(&dir));
        assert!(out.is_ok());
        assert_eq!(out.output, "one\ntwo\nthree\n");
        assert_eq!(out.metadata["total_lines"], json!(3));
        assert!(!out.metadata.contains_key("returned_lines"));
    }

    #[test]
    fn test_line_window_is_inclusive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();

        let out = execute(
            &json!({"path": "f.txt", "start_line": 2, "end_line": "3"}),
            &ctx(&dir),
        );
        assert_eq!(out.output, "b\nc\n");
        assert_eq!(out.metadata["returned_lines"], json!("2-3"));

        let out = execute(&json!({"path": "f.txt", "start_line": 4}), &ctx(&dir));
        assert_eq!(out.output, "d\n");

        let out = execute(&json!({"path": "f.txt", "start_line": 9}), &ctx(&dir));
        assert!(out.is_ok());
        assert_eq!(out.output, "");
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = TempDir::new().unwrap();

        let out = execute(&json!({"path": "absent.txt"}), &ctx(&dir));
        assert_eq!(out.error_info().unwrap().0, "not_found");

        fs::create_dir(dir.path().join("sub")).unwrap();
        let out = execute(&json!({"path": "sub"}), &ctx(&dir));
        assert_eq!(out.error_info().unwrap().0, "not_a_file");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bin"), [b'o', b'k', 0xFF, b'\n']).unwrap();

        let out = execute(&json!({"path": "bin"}), &ctx(&dir));
        assert!(out.is_ok());
        assert_eq!(out.output, "ok\u{FFFD}\n");
    }

    #[test]
    fn test_oversized_content_is_truncated_with_marker() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(MAX_CHARS + 10)).unwrap();

        let out = execute(&json!({"path": "big.txt"}), &ctx(&dir));
        assert!(out.output.starts_with(&"x".repeat(MAX_CHARS)));
        assert!(
            out.output
                .ends_with("\n\n... (truncated, total 100010 chars)")
        );
    }

    #[test]
    fn test_missing_path_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let out = execute(&json!({}), &ctx(&dir));
        assert_eq!(out.error_info().unwrap().0, "invalid_input");
    }
}
