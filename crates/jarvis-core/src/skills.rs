//! Skill discovery and parsing.
//!
//! A skill is a directory `skills/<name>/` holding a `SKILL.md` with YAML
//! frontmatter (`name`, `description`) and free-form instructions.
//! `create_skill` writes them; this module finds them again on the next
//! session so they can be listed in the system prompt.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Discovered skill metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub file_path: PathBuf,
    pub base_dir: PathBuf,
}

/// Warning generated during skill loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillWarning {
    pub skill_path: PathBuf,
    pub message: String,
}

impl SkillWarning {
    fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            skill_path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadSkillsResult {
    pub skills: Vec<Skill>,
    pub warnings: Vec<SkillWarning>,
}

/// Loads every `<dir>/*/SKILL.md`, sorted by skill name.
///
/// A missing directory yields an empty result. Entries that cannot be
/// parsed are skipped and reported as warnings.
pub fn load_skills(dir: &Path) -> LoadSkillsResult {
    let mut result = LoadSkillsResult::default();
    if !dir.exists() {
        return result;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            result
                .warnings
                .push(SkillWarning::new(dir, format!("Failed to read skills directory: {e}")));
            return result;
        }
    };

    let mut seen_names = HashSet::new();
    let mut skill_files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .map(|path| path.join("SKILL.md"))
        .filter(|path| path.is_file())
        .collect();
    skill_files.sort();

    for path in skill_files {
        match load_skill_file(&path) {
            Ok(skill) => {
                if seen_names.insert(skill.name.clone()) {
                    result.skills.push(skill);
                } else {
                    let message = format!("Duplicate skill name '{}' detected; skipping", skill.name);
                    result.warnings.push(SkillWarning::new(&path, message));
                }
            }
            Err(message) => result.warnings.push(SkillWarning::new(&path, message)),
        }
    }

    for warning in &result.warnings {
        tracing::warn!(path = %warning.skill_path.display(), "{}", warning.message);
    }
    result.skills.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

fn load_skill_file(path: &Path) -> Result<Skill, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read skill file: {e}"))?;
    let frontmatter = parse_frontmatter(&content)?;

    let name = frontmatter.name.unwrap_or_default().trim().to_string();
    if name.is_empty() {
        return Err("Missing name in skill frontmatter".to_string());
    }
    validate_name(&name)?;

    let description = frontmatter
        .description
        .unwrap_or_default()
        .trim()
        .to_string();
    if description.is_empty() {
        return Err("Missing description in skill frontmatter".to_string());
    }

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    if let Some(dir_name) = base_dir.file_name().and_then(|n| n.to_str())
        && dir_name != name
    {
        return Err(format!(
            "Skill name '{name}' does not match directory '{dir_name}'"
        ));
    }

    Ok(Skill {
        name,
        description,
        file_path: path.to_path_buf(),
        base_dir,
    })
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: Option<String>,
    description: Option<String>,
}

fn parse_frontmatter(content: &str) -> Result<SkillFrontmatter, String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines();

    if lines.next().map(str::trim) != Some("---") {
        return Err("Missing YAML frontmatter".to_string());
    }

    let mut yaml_lines = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed == "---" || trimmed == "..." {
            let yaml = yaml_lines.join("\n");
            return serde_yaml::from_str(&yaml)
                .map_err(|e| format!("Failed to parse YAML frontmatter: {e}"));
        }
        yaml_lines.push(line);
    }

    Err("Unterminated YAML frontmatter".to_string())
}

/// Checks a kebab-case artifact name: `[a-z0-9-]`, 1-64 chars, no
/// leading, trailing or doubled hyphen.
///
/// # Errors
/// Returns a human-readable reason when the name is rejected.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err(format!("Name '{name}' must be 1-64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "Name '{name}' must be lowercase alphanumeric or '-'"
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(format!("Name '{name}' must not start or end with '-'"));
    }
    if name.contains("--") {
        return Err(format!("Name '{name}' must not contain consecutive '-'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_skill(dir: &Path, folder: &str, content: &str) {
        let skill_dir = dir.join(folder);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn test_loads_valid_skills_sorted() {
        let temp = TempDir::new().unwrap();
        write_skill(
            temp.path(),
            "weekly-report",
            "---\nname: weekly-report\ndescription: \"Summarise the week: wins, blockers\"\n---\n\n# Weekly Report\n",
        );
        write_skill(
            temp.path(),
            "backup",
            "\u{feff}---\nname: backup\ndescription: Back up documents\n---\nbody\n",
        );

        let result = load_skills(temp.path());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        let names: Vec<_> = result.skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["backup", "weekly-report"]);
        assert_eq!(
            result.skills[1].description,
            "Summarise the week: wins, blockers"
        );
    }

    #[test]
    fn test_bad_entries_become_warnings() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "no-front", "# just markdown\n");
        write_skill(temp.path(), "unterminated", "---\nname: unterminated\n");
        write_skill(
            temp.path(),
            "mismatch",
            "---\nname: other-name\ndescription: x\n---\n",
        );
        write_skill(temp.path(), "nodesc", "---\nname: nodesc\n---\n");

        let result = load_skills(temp.path());
        assert!(result.skills.is_empty());
        assert_eq!(result.warnings.len(), 4);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let result = load_skills(&temp.path().join("absent"));
        assert!(result.skills.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("daily-report").is_ok());
        assert!(validate_name("v2").is_ok());
        for bad in ["", "Upper", "-lead", "trail-", "dou--ble", "../up", "a_b"] {
            assert!(validate_name(bad).is_err(), "{bad} accepted");
        }
        assert!(validate_name(&"a".repeat(65)).is_err());
    }
}
