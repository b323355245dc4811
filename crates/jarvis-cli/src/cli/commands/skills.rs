//! Skills command handler.

use jarvis_core::config::paths;
use jarvis_core::skills::load_skills;

pub fn list() {
    let dir = paths::skills_dir();
    let result = load_skills(&dir);

    for warning in &result.warnings {
        eprintln!(
            "Warning: {}: {}",
            warning.skill_path.display(),
            warning.message
        );
    }

    if result.skills.is_empty() {
        println!("No skills found in {}.", dir.display());
        return;
    }

    let width = result
        .skills
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or_default();
    for skill in &result.skills {
        println!("{:<width$}  {}", skill.name, skill.description);
    }
}
