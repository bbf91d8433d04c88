//! CLI tests: spawn the autoloop binary and check exit codes and output.

use std::path::Path;
use std::process::{Command, Output};

use autoloop::exit_codes;
use autoloop::io::init::RunPaths;
use autoloop::io::task_store::write_tasks;
use autoloop::test_support::task;

fn autoloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn autoloop")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn authorize_exit_codes_follow_decision() {
    let temp = tempfile::tempdir().expect("tempdir");

    let allowed = autoloop(temp.path(), &["authorize", "git status && cargo test"]);
    assert_eq!(allowed.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&allowed).trim(), "allow");

    let piped = autoloop(temp.path(), &["authorize", "echo hi | rm -rf /", "--preset", "full"]);
    assert_eq!(piped.status.code(), Some(exit_codes::DENIED));
    assert!(stdout(&piped).starts_with("deny:"));

    let chmod = autoloop(temp.path(), &["authorize", "chmod 777 file.txt"]);
    assert_eq!(chmod.status.code(), Some(exit_codes::DENIED));
    assert!(stdout(&chmod).contains("777"));
}

#[test]
fn authorize_deny_wins_over_allow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = ["authorize", "docker ps", "--preset", "readonly", "--allow", "docker"];

    let allowed = autoloop(temp.path(), &base);
    assert_eq!(allowed.status.code(), Some(exit_codes::OK));

    let mut denied_args = base.to_vec();
    denied_args.extend(["--deny", "docker"]);
    let denied = autoloop(temp.path(), &denied_args);
    assert_eq!(denied.status.code(), Some(exit_codes::DENIED));
}

#[test]
fn start_then_inspect_fresh_run() {
    let temp = tempfile::tempdir().expect("tempdir");

    let start = autoloop(temp.path(), &["start", "--kind", "builder", "--spec", "A todo CLI"]);
    assert_eq!(start.status.code(), Some(exit_codes::OK), "{start:?}");
    assert!(stdout(&start).contains("started builder run"));

    let next = autoloop(temp.path(), &["next"]);
    assert_eq!(next.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&next).trim(), "initialize");

    let validate = autoloop(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK), "{validate:?}");

    let status = autoloop(temp.path(), &["status", "--json"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_slice(&status.stdout).expect("status json");
    assert_eq!(json["phase"], "fresh");
    assert_eq!(json["kind"], "builder");

    let again = autoloop(temp.path(), &["start", "--kind", "builder", "--spec", "A todo CLI"]);
    assert!(stdout(&again).contains("resumed builder run"));
}

#[test]
fn start_without_spec_is_invalid_and_writes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let start = autoloop(temp.path(), &["start", "--kind", "feature"]);
    assert_eq!(start.status.code(), Some(exit_codes::INVALID));
    assert!(!RunPaths::new(temp.path()).run_dir.exists());
}

#[test]
fn run_before_start_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let run = autoloop(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&run.stderr).contains("run not started"));
}

#[test]
fn next_reports_eligible_task_and_validate_flags_bad_graph() {
    let temp = tempfile::tempdir().expect("tempdir");
    let start = autoloop(temp.path(), &["start", "--kind", "bugfix", "--spec", "crash on empty input"]);
    assert_eq!(start.status.code(), Some(exit_codes::OK));

    let paths = RunPaths::new(temp.path());
    let mut state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.state_path).expect("state"))
            .expect("state json");
    state["initialized"] = serde_json::Value::Bool(true);
    std::fs::write(&paths.state_path, state.to_string()).expect("write state");
    write_tasks(&paths.tasks_path, &[task("repro", &[]), task("fix", &["repro"])]).expect("tasks");

    let next = autoloop(temp.path(), &["next"]);
    assert_eq!(next.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&next).trim(), "repro");

    write_tasks(&paths.tasks_path, &[task("fix", &["missing"])]).expect("tasks");
    let validate = autoloop(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::INVALID));
    assert!(stdout(&validate).contains("missing"));
}
