//! CLI tests for commands that need neither git nor the review CLI.
//!
//! Spawns the conductor binary inside a scratch directory with user config
//! lookups pointed at an empty home.

use std::path::Path;
use std::process::{Command, Output};

use conductor::core::ledger::Ledger;
use conductor::core::types::Phase;
use conductor::exit_codes;
use conductor::io::init::{ConductorPaths, InitOptions, init_conductor};
use conductor::io::ledger_store::write_ledger;
use conductor::test_support::{fixed_time, record};

fn conductor(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_conductor"))
        .current_dir(root)
        .args(args)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("xdg"))
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn conductor")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_twice_needs_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = conductor(temp.path(), &["init"]);
    let second = conductor(temp.path(), &["init"]);
    let forced = conductor(temp.path(), &["init", "--force"]);

    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
    assert!(ConductorPaths::new(temp.path()).config_path.exists());
}

#[test]
fn status_prints_tracked_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
    let mut ledger = Ledger::new("sess-cli", fixed_time());
    ledger
        .tasks
        .insert("12".to_string(), record("12", Phase::Executing));
    write_ledger(&paths.ledger_path, &ledger).expect("write ledger");

    let output = conductor(temp.path(), &["status"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("sess-cli"));
    assert!(text.contains("conductor/12-task"));
    assert!(text.contains("executing=1"));
}

#[test]
fn stop_leaves_a_marker() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_conductor(temp.path(), &InitOptions { force: false }).expect("init");

    let output = conductor(temp.path(), &["stop"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(ConductorPaths::new(temp.path()).stop_requested());
}

#[test]
fn rank_orders_the_backlog() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
    let backlog = r#"{
        "tasks": [
            {"id": "low", "title": "Tidy docs", "priority": 4},
            {"id": "hot", "title": "Fix outage", "priority": 0},
            {"id": "done", "title": "Shipped", "status": "closed"}
        ]
    }"#;
    std::fs::write(temp.path().join(".conductor/backlog.json"), backlog).expect("write backlog");

    let output = conductor(temp.path(), &["rank"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    let hot = text.find("hot").expect("hot listed");
    let low = text.find("low").expect("low listed");
    assert!(hot < low);
    assert!(!text.contains("done"));
}

#[test]
fn run_outside_an_initialized_repository_fails() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = conductor(temp.path(), &["run", "--once"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("conductor init"));
}
