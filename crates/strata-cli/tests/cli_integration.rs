//! Integration tests for the `strata` binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const DOUBLED: &str = r#"{
    "type": "models",
    "children": [
        {"type": "value", "attributes": {"name": "x", "type": "int", "init": 5}},
        {"type": "transform", "attributes": {"name": "y", "source": "x"}, "children": [
            {"type": "map-to", "attributes": {"map": {"expr": {"binary": {
                "op": "mul", "left": {"name": "source"}, "right": {"lit": 2}}}}}}
        ]}
    ]
}"#;

const BROKEN: &str = r#"{"type": "models", "children": [{"type": "gadget"}]}"#;

fn write_doc(dir: &Path, source: &str) -> PathBuf {
    let path = dir.join("doc.json");
    std::fs::write(&path, source).unwrap();
    path
}

fn strata(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_strata"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

// ────────────────────────────────────────────────────────────────────────────
// check
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_check_clean_document() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), DOUBLED);
    let output = strata(&["check", doc.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_check_reports_errors_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), BROKEN);
    let output = strata(&["check", doc.to_str().unwrap(), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["code"], "E1001");
}

#[test]
fn test_check_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), DOUBLED);
    std::fs::write(dir.path().join("strata.toml"), "[loops]\nmax_iterations = 0\n").unwrap();
    let output = strata(&["check", doc.to_str().unwrap()]);
    assert!(!output.status.success());
}

// ────────────────────────────────────────────────────────────────────────────
// eval
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_eval_prints_values() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), DOUBLED);
    let output = strata(&["eval", doc.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("x: Value<int> = 5"), "{}", stdout);
    assert!(stdout.contains("y: Value<int> = 10"), "{}", stdout);
}

#[test]
fn test_eval_selected_name() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), DOUBLED);
    let output = strata(&["eval", doc.to_str().unwrap(), "y"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("y: Value<int> = 10"), "{}", stdout);
    assert!(!stdout.contains("x:"), "{}", stdout);
}

#[test]
fn test_eval_unknown_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_doc(dir.path(), DOUBLED);
    let output = strata(&["eval", doc.to_str().unwrap(), "nope"]);
    assert!(!output.status.success());
}
