//! Write file tool.
//!
//! Creates, overwrites or appends to files, creating parent directories
//! as needed. Writes under system directories are refused in every mode.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use super::{ToolContext, ToolDefinition, parse_input, resolve_path};
use crate::core::events::{ToolOutput, codes};

/// System locations no write may touch, matched per path component.
const DENIED_PREFIXES: &[&str] = &[
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/private/etc",
    "/var/root",
    "/private/var/root",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WriteMode {
    /// Fail if the file exists
    Create,
    #[default]
    Overwrite,
    Append,
}

impl WriteMode {
    fn as_str(self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        }
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "file_write".to_string(),
        description: "Write text to a file. Parent directories are created automatically. \
            mode=create fails if the file exists, overwrite (default) replaces it, append \
            adds to the end. System directories are off limits."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["create", "overwrite", "append"],
                    "description": "Write mode (default: overwrite)"
                }
            },
            "required": ["path", "content"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    path: String,
    content: String,
    #[serde(default)]
    mode: WriteMode,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: WriteInput = match parse_input(input) {
        Ok(i) => i,
        Err(out) => return out,
    };

    let path = normalize_lexically(&resolve_path(&input.path, &ctx.root));
    let shown = path.display().to_string();

    if is_denied(&path) || is_denied(&resolve_symlinks(&path)) {
        tracing::warn!(path = %shown, "refusing write to system path");
        return ToolOutput::failure(
            codes::SECURITY_DENIED,
            format!("Writing to system path is not allowed: {shown}"),
        );
    }
    if path.is_dir() {
        return ToolOutput::failure(codes::NOT_A_FILE, format!("Path is a directory: {shown}"));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = fs::create_dir_all(parent)
    {
        return ToolOutput::failure(
            codes::IO_ERROR,
            format!("Failed to create directory '{}': {e}", parent.display()),
        );
    }

    let result = match input.mode {
        WriteMode::Create => write_new(&path, &input.content),
        WriteMode::Overwrite => write_atomic(&path, &input.content),
        WriteMode::Append => append(&path, &input.content),
    };

    match result {
        Ok(()) => {
            let size = input.content.len();
            let verb = if input.mode == WriteMode::Append {
                "Appended"
            } else {
                "Wrote"
            };
            ToolOutput::success(format!("{verb} {size} bytes to {shown}"))
                .with_metadata("path", shown)
                .with_metadata("size", size)
                .with_metadata("mode", input.mode.as_str())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => ToolOutput::failure(
            codes::ALREADY_EXISTS,
            format!("File already exists: {shown}"),
        ),
        Err(e) => ToolOutput::failure(
            codes::IO_ERROR,
            format!("Failed to write file '{shown}': {e}"),
        ),
    }
}

fn write_new(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())
}

/// Writes to a sibling temp file, then renames it over `path`.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn append(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Follows symlinks along `path`, including a dangling final link.
///
/// The longest existing prefix is canonicalized and the missing tail is
/// appended unchanged, so a link into a system directory is judged by
/// where the write would actually land.
fn resolve_symlinks(path: &Path) -> PathBuf {
    resolve_symlinks_bounded(path, MAX_SYMLINK_HOPS)
}

const MAX_SYMLINK_HOPS: usize = 40;

fn resolve_symlinks_bounded(path: &Path, hops: usize) -> PathBuf {
    let mut existing = path;
    let mut tail: Vec<&OsStr> = Vec::new();

    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            return tail.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            return path.to_path_buf();
        };

        let is_link = fs::symlink_metadata(existing).is_ok_and(|m| m.file_type().is_symlink());
        if is_link
            && hops > 0
            && let Ok(target) = fs::read_link(existing)
        {
            let mut next = normalize_lexically(&parent.join(target));
            for part in tail.iter().rev() {
                next.push(part);
            }
            return resolve_symlinks_bounded(&next, hops - 1);
        }

        tail.push(name);
        existing = parent;
    }
}

fn is_denied(path: &Path) -> bool {
    DENIED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}
