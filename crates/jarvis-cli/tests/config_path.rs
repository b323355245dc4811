use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_config_path_command() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at"));

    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("model ="));
    assert!(contents.contains("max_rounds = 10"));
    assert!(contents.contains("[provider]"));
}

#[test]
fn test_config_init_fails_if_exists() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "# existing config").unwrap();

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_invalid_config_fails_exec() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "max_rounds = \"lots\"").unwrap();

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .args(["exec", "-p", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn test_skills_empty() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .arg("skills")
        .assert()
        .success()
        .stdout(predicate::str::contains("No skills found"));
}

#[test]
fn test_skills_lists_saved_skill() {
    let dir = tempdir().unwrap();
    let skill_dir = dir.path().join("skills").join("weekly-report");
    fs::create_dir_all(&skill_dir).unwrap();
    fs::write(
        skill_dir.join("SKILL.md"),
        "---\nname: weekly-report\ndescription: Summarise the week\n---\nRead the notes.\n",
    )
    .unwrap();

    cargo_bin_cmd!("jarvis")
        .env("JARVIS_HOME", dir.path())
        .arg("skills")
        .assert()
        .success()
        .stdout(predicate::str::contains("weekly-report  Summarise the week"));
}
