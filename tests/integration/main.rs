//! Integration tests for the batchpilot binary.
//!
//! Every test runs the binary inside its own temp directory with a small
//! profiles tree, so no configuration or credentials leak in from the host.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const INSTAGRAM_INDEX: &str = r##"---
title: Instagram creators
profiles:
  - username: alice
    fullname: Alice Baker
    bio: Sourdough every morning
    followers: 1200
    hashtags: "#bread #baking"
  - username: bruno
    bio: Street photography in Lisbon
    location: Lisbon
  - username: carla
    bio: Trail running and mountain huts
---
"##;

const TIKTOK_INDEX: &str = r#"---
profiles:
  - username: dev
    bio: Thirty second recipes
  - username: eve
    bio: Bouldering clips
---
"#;

fn workspace() -> TempDir {
    let temp_dir = TempDir::new().expect("temp dir");
    write(temp_dir.path(), "profiles/instagram/_index.md", INSTAGRAM_INDEX);
    write(temp_dir.path(), "profiles/tiktok/_index.md", TIKTOK_INDEX);
    temp_dir
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn batchpilot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("batchpilot").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .args(["--profiles-dir", "profiles", "--results-dir", "results"]);
    cmd
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_prepare_writes_batch_files_per_platform() {
    let dir = workspace();

    batchpilot(&dir)
        .arg("prepare")
        .assert()
        .success()
        .stdout(predicate::str::contains("## Batch Plan"))
        .stdout(predicate::str::contains("### instagram"))
        .stdout(predicate::str::contains("### tiktok"))
        .stdout(predicate::str::contains("5 records, 2 batches, 2 sessions, 1500 tokens"));

    let instagram = read_lines(&dir.path().join("results/instagram_session1_batch1_input.jsonl"));
    assert_eq!(instagram.len(), 3);
    assert_eq!(instagram[0]["custom_id"], "profile0");
    assert_eq!(instagram[0]["method"], "POST");
    assert_eq!(instagram[0]["url"], "/v1/chat/completions");
    assert_eq!(instagram[0]["body"]["model"], "gpt-4o-mini");
    assert_eq!(instagram[2]["custom_id"], "profile2");
    assert!(instagram[1]["body"]["messages"][1]["content"]
        .as_str()
        .unwrap()
        .contains("bruno"));

    let tiktok = read_lines(&dir.path().join("results/tiktok_session1_batch1_input.jsonl"));
    assert_eq!(tiktok.len(), 2);
}

#[test]
fn test_prepare_starts_new_session_when_budget_fills() {
    let dir = workspace();

    batchpilot(&dir)
        .env("BATCHPILOT__PARTITION__SESSION_BUDGET", "600")
        .arg("prepare")
        .assert()
        .success();

    let results = dir.path().join("results");
    assert_eq!(read_lines(&results.join("instagram_session1_batch1_input.jsonl")).len(), 2);
    assert_eq!(read_lines(&results.join("instagram_session2_batch1_input.jsonl")).len(), 1);
    assert_eq!(read_lines(&results.join("tiktok_session1_batch1_input.jsonl")).len(), 2);
}

#[test]
fn test_prepare_dry_run_writes_nothing() {
    let dir = workspace();

    batchpilot(&dir)
        .args(["--dry-run", "prepare"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Batch Plan"));

    assert!(!dir.path().join("results").exists());
}

#[test]
fn test_prepare_reads_config_file() {
    let dir = workspace();
    write(
        dir.path(),
        "planning.toml",
        "[partition]\nsession_budget = 10000\nbatch_budget = 600\n",
    );

    batchpilot(&dir)
        .args(["--config", "planning.toml", "prepare"])
        .assert()
        .success();

    let results = dir.path().join("results");
    assert!(results.join("instagram_session1_batch2_input.jsonl").exists());
    assert!(!results.join("instagram_session2_batch1_input.jsonl").exists());
}

#[test]
fn test_analyze_writes_summary() {
    let dir = workspace();

    batchpilot(&dir)
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("**Profiles**: 5"));

    let analysis: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("results/analysis.json")).unwrap()).unwrap();
    assert_eq!(analysis["totalProfiles"], 5);
    assert!(analysis["totalEstimatedInputTokens"].as_u64().unwrap() > 0);
    assert!(analysis["totalCost"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_analyze_missing_profiles_dir_fails() {
    let dir = TempDir::new().unwrap();

    batchpilot(&dir)
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("profiles directory not found"));
}

#[test]
fn test_inspect_after_prepare() {
    let dir = workspace();
    batchpilot(&dir).arg("prepare").assert().success();

    batchpilot(&dir)
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("## Batch File Analysis"))
        .stdout(predicate::str::contains("instagram_session1_batch1_input.jsonl: 3 records"))
        .stdout(predicate::str::contains("within the queue limit"));
}

#[test]
fn test_inspect_flags_queue_overflow() {
    let dir = workspace();
    batchpilot(&dir).arg("prepare").assert().success();

    batchpilot(&dir)
        .env("BATCHPILOT__LIMITS__QUEUE_TOKEN_LIMIT", "10")
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("exceeds the queue limit"));
}

#[test]
fn test_inspect_without_batches_fails() {
    let dir = workspace();
    fs::create_dir_all(dir.path().join("results")).unwrap();

    batchpilot(&dir)
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no batch files found"));
}

#[test]
fn test_deploy_dry_run_lists_batches_without_key() {
    let dir = workspace();
    batchpilot(&dir).arg("prepare").assert().success();

    batchpilot(&dir)
        .args(["--dry-run", "deploy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tiktok_session1_batch1_input.jsonl"));

    assert!(!dir.path().join("results/submission_results.json").exists());
}

#[test]
fn test_deploy_requires_api_key() {
    let dir = workspace();
    batchpilot(&dir).arg("prepare").assert().success();

    batchpilot(&dir).arg("deploy").assert().failure();
}

#[test]
fn test_execute_dry_run_simulates_every_profile() {
    let dir = workspace();

    batchpilot(&dir)
        .env("BATCHPILOT__LIMITS__MIN_DELAY_MS", "0")
        .env("BATCHPILOT__LIMITS__TOKENS_PER_MINUTE", "100000000")
        .args(["--dry-run", "execute"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Execution Summary"))
        .stdout(predicate::str::contains("**Profiles**: 5 described, 0 failed"));

    assert!(!dir.path().join("results/updated_profiles").exists());
}

#[test]
fn test_execute_sample_limits_to_one_document() {
    let dir = workspace();

    batchpilot(&dir)
        .env("BATCHPILOT__LIMITS__MIN_DELAY_MS", "0")
        .env("BATCHPILOT__LIMITS__TOKENS_PER_MINUTE", "100000000")
        .args(["--dry-run", "execute", "--sample", "tiktok/_index.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("**Profiles**: 2 described"))
        .stdout(predicate::str::contains("**Documents written**: 1"));
}

#[test]
fn test_execute_sample_outside_profiles_fails() {
    let dir = workspace();
    write(dir.path(), "outside.md", TIKTOK_INDEX);

    batchpilot(&dir)
        .args(["--dry-run", "execute", "--sample", "../outside.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be relative to the profiles directory"));

    assert!(!dir.path().join("results").exists());
}

#[test]
fn test_config_prints_effective_values() {
    let dir = workspace();

    batchpilot(&dir)
        .env("BATCHPILOT__LIMITS__TOKENS_PER_DAY", "120000")
        .env("OPENAI_API_KEY", "sk-hidden")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("tokens_per_day = 120000"))
        .stdout(predicate::str::contains("sk-hidden").not());
}
