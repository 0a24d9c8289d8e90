//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary data
//! directory and checks the JSON it prints.

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_questlog"))
        .env("QUESTLOG_HOME", home)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(home: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, code) = run_cli(home, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_task_create_and_list() {
    let home = TempDir::new().unwrap();
    let task = run_json(
        home.path(),
        &["task", "create", "Water plants", "--recurrence", "daily", "--domain", "health"],
    );
    assert_eq!(task["title"], "Water plants");
    assert_eq!(task["recurrence"], "daily");
    assert_eq!(task["status"], "active");

    let tasks = run_json(home.path(), &["task", "list"]);
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}

#[test]
fn test_task_done_twice_same_day() {
    let home = TempDir::new().unwrap();
    let task = run_json(home.path(), &["task", "create", "Stretch", "--recurrence", "daily"]);
    let id = task["id"].to_string();

    let first = run_json(home.path(), &["task", "done", &id]);
    assert_eq!(first["status"], "completed");
    assert!(first["xp"].as_f64().unwrap() > 0.0);

    let second = run_json(home.path(), &["task", "done", &id]);
    assert_eq!(second["status"], "already_completed");

    let level = run_json(home.path(), &["stats", "level"]);
    assert_eq!(level["level"], 1);
    assert_eq!(level["xp_total"], first["xp"]);
}

#[test]
fn test_one_off_task_archives() {
    let home = TempDir::new().unwrap();
    let task = run_json(home.path(), &["task", "create", "Renew passport", "--priority", "must"]);
    let id = task["id"].to_string();

    run_json(home.path(), &["task", "done", &id]);
    let (_, stderr, code) = run_cli(home.path(), &["task", "done", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("archived"));

    let active = run_json(home.path(), &["task", "list"]);
    assert!(active.as_array().unwrap().is_empty());
    let all = run_json(home.path(), &["task", "list", "--all"]);
    assert_eq!(all[0]["status"], "archived");
}

#[test]
fn test_invalid_input_fails() {
    let home = TempDir::new().unwrap();
    let (_, _, code) = run_cli(home.path(), &["task", "create", "Bad", "--recurrence", "fortnightly"]);
    assert_ne!(code, 0);
    let (_, stderr, code) = run_cli(home.path(), &["task", "create", "Nowhere", "--domain", "space"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown domain"));
    let (_, _, code) = run_cli(home.path(), &["task", "get", "42"]);
    assert_eq!(code, 1);
}

#[test]
fn test_task_status_changes() {
    let home = TempDir::new().unwrap();
    let task = run_json(home.path(), &["task", "create", "Fix fence", "--recurrence", "daily"]);
    let id = task["id"].to_string();

    let waiting = run_json(home.path(), &["task", "status", &id, "waiting"]);
    assert_eq!(waiting["status"], "waiting");
    let digest = run_json(home.path(), &["digest", "today"]);
    assert!(digest["due_today"].as_array().unwrap().is_empty());

    let archived = run_json(home.path(), &["task", "status", &id, "archived"]);
    assert_eq!(archived["status"], "archived");
    let (_, stderr, code) = run_cli(home.path(), &["task", "done", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("archived"));
}

#[test]
fn test_repeated_done_from_separate_processes() {
    use std::thread;

    let home = TempDir::new().unwrap();
    let task = run_json(home.path(), &["task", "create", "Floss", "--recurrence", "daily"]);
    let id = task["id"].to_string();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let home = home.path().to_path_buf();
            let id = id.clone();
            thread::spawn(move || run_json(&home, &["task", "done", &id]))
        })
        .collect();
    let reports: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let completed: Vec<_> = reports.iter().filter(|r| r["status"] == "completed").collect();
    assert_eq!(completed.len(), 1);
    let level = run_json(home.path(), &["stats", "level"]);
    assert_eq!(level["xp_total"], completed[0]["xp"]);
}

#[test]
fn test_preview_and_subtasks() {
    let home = TempDir::new().unwrap();
    let task = run_json(home.path(), &["task", "create", "Move house", "--weight", "3", "--novelty"]);
    let id = task["id"].to_string();

    let preview = run_json(home.path(), &["task", "preview", &id]);
    assert!(preview["terms"].as_array().unwrap().iter().any(|t| t["name"] == "novelty"));

    let sub = run_json(home.path(), &["task", "subtask-add", &id, "Pack boxes"]);
    let toggled = run_json(home.path(), &["task", "subtask-toggle", &sub["id"].to_string()]);
    assert_eq!(toggled["subtask"]["done"], true);
    assert_eq!(toggled["task_completion"]["status"], "completed");
}

#[test]
fn test_rewards_listed_and_claim_refused() {
    let home = TempDir::new().unwrap();
    let rewards = run_json(home.path(), &["reward", "list"]);
    assert_eq!(rewards.as_array().unwrap().len(), 3);

    let id = rewards[0]["id"].to_string();
    let (_, stderr, code) = run_cli(home.path(), &["reward", "claim", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Requirements not met"));

    let free = run_json(home.path(), &["reward", "add", "Coffee", "--cost", "0"]);
    let claimed = run_json(home.path(), &["reward", "claim", &free["id"].to_string()]);
    assert_eq!(claimed["status"], "claimed");
}

#[test]
fn test_digest_and_stats() {
    let home = TempDir::new().unwrap();
    run_json(home.path(), &["task", "create", "Read", "--recurrence", "daily"]);

    let digest = run_json(home.path(), &["digest", "today", "--mark"]);
    assert_eq!(digest["due_today"].as_array().unwrap().len(), 1);

    let weekly = run_json(home.path(), &["digest", "weekly"]);
    assert_eq!(weekly["completions"], 0);

    let snapshot = run_json(home.path(), &["stats", "snapshot", "--days", "7"]);
    assert_eq!(snapshot["days"], 7);
    run_json(home.path(), &["stats", "streaks"]);
    run_json(home.path(), &["stats", "domains"]);
}

#[test]
fn test_config_get_set() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "balance.lookback_days"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "30");

    let (_, _, code) = run_cli(home.path(), &["config", "set", "user.timezone", "Europe/Zurich"]);
    assert_eq!(code, 0);
    let config = run_json(home.path(), &["config", "show"]);
    assert_eq!(config["user"]["timezone"], "Europe/Zurich");
    let (_, _, code) = run_cli(home.path(), &["config", "set", "user.timezone", "Atlantis/Capital"]);
    assert_eq!(code, 1);

    let (_, _, code) = run_cli(home.path(), &["config", "set", "user.digest_hour", "30"]);
    assert_eq!(code, 1);
    let (_, _, code) = run_cli(home.path(), &["config", "get", "no.such.key"]);
    assert_eq!(code, 1);
}
