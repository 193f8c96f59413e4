//! Integration tests for the taskrunner CLI.
//!
//! These run the compiled binary against a temporary SQLite file, so each
//! command exercises exactly the code path a user would.

use serde_json::Value;
use std::path::Path;
use std::process::Command;

fn taskrunner(db: &Path, args: &[&str]) -> (bool, Value, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_taskrunner"))
        .arg("--db")
        .arg(db)
        .args(args)
        .env_remove("TASKRUNNER_CONFIG")
        .env_remove("TASKRUNNER_MAX_STEPS")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run taskrunner binary");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let json = serde_json::from_str(&stdout).unwrap_or(Value::Null);
    (output.status.success(), json, stderr)
}

#[test]
fn test_create_run_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cli.db");

    let (ok, out, _) = taskrunner(
        &db,
        &["create", "--flow", "echo_add", "--input", r#"{"text":"hi","a":2,"b":3}"#],
    );
    assert!(ok);
    assert_eq!(out["task"]["status"], "PLANNED");
    let id = out["task"]["id"].as_str().unwrap().to_string();

    let (ok, out, _) = taskrunner(&db, &["advance", "--id", &id]);
    assert!(ok);
    assert_eq!(out["task"]["stepCounter"], 1);

    let (ok, out, _) = taskrunner(&db, &["run", "--id", &id]);
    assert!(ok);
    assert_eq!(out["task"]["status"], "COMPLETED");
    assert_eq!(out["task"]["state"]["add_result"]["sum"], 5);

    let (ok, out, _) = taskrunner(&db, &["show", "--id", &id]);
    assert!(ok);
    assert_eq!(out["steps"].as_array().unwrap().len(), 2);
    let calls = out["toolCalls"].as_array().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c["durationMs"].as_i64().is_some()));
    assert_eq!(out["snapshots"].as_array().unwrap().len(), 2);
    assert!(out["audit"].as_array().unwrap().is_empty());

    let (ok, out, _) = taskrunner(&db, &["list"]);
    assert!(ok);
    assert_eq!(out["tasks"].as_array().unwrap().len(), 1);

    let (ok, out, _) = taskrunner(&db, &["metrics"]);
    assert!(ok);
    assert_eq!(out["metrics"]["tasksByStatus"]["COMPLETED"], 1);
}

#[test]
fn test_errors_exit_nonzero_with_kind() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cli.db");

    let (ok, _, stderr) = taskrunner(&db, &["create", "--flow", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown flow"));

    let (ok, _, stderr) = taskrunner(&db, &["create", "--flow", "echo_add", "--input", "{oops"]);
    assert!(!ok);
    assert!(stderr.contains("Invalid --input JSON"));

    let (ok, _, stderr) = taskrunner(&db, &["get", "--id", "missing"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown task"));
}

#[test]
fn test_catalog_commands() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cli.db");

    let (ok, out, _) = taskrunner(&db, &["flows"]);
    assert!(ok);
    assert_eq!(out["flows"].as_array().unwrap().len(), 3);

    let (ok, out, _) = taskrunner(&db, &["tools"]);
    assert!(ok);
    assert_eq!(out["allowlist"], serde_json::json!(["add", "echo"]));

    let (ok, out, _) = taskrunner(
        &db,
        &["validate", "--flow", "add_echo", "--input", r#"{"a":1,"b":2,"text":"x"}"#],
    );
    assert!(ok);
    assert_eq!(out["valid"], true);

    let (ok, _, stderr) = taskrunner(&db, &["validate", "--flow", "add_echo", "--input", r#"{"a":1}"#]);
    assert!(!ok);
    assert!(stderr.contains("Schema violation"));
}

#[test]
fn test_config_file_limits_steps() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cli.db");
    let config = dir.path().join("runner.yaml");
    std::fs::write(&config, "policy:\n  max_steps: 1\n").unwrap();
    let config = config.to_str().unwrap();

    let (_, out, _) = taskrunner(
        &db,
        &["create", "--flow", "echo_add", "--input", r#"{"text":"hi","a":1,"b":1}"#],
    );
    let id = out["task"]["id"].as_str().unwrap().to_string();

    let (ok, _, stderr) = taskrunner(&db, &["--config", config, "run", "--id", &id]);
    assert!(!ok);
    assert!(stderr.contains("Step limit exceeded"));

    let (_, out, _) = taskrunner(&db, &["get", "--id", &id]);
    assert_eq!(out["task"]["status"], "FAILED");
}
