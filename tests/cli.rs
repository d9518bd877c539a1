use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;
use viper::TrapKind;

fn run_cli(dir: &Path, name: &str, module: &str, flags: &[&str]) -> Output {
    let path = dir.join(name);
    fs::write(&path, module).expect("module file written");
    Command::new(env!("CARGO_BIN_EXE_viper"))
        .arg("run")
        .arg(&path)
        .args(flags)
        .env_remove("RUST_LOG")
        .output()
        .expect("viper binary runs")
}

const BARE_TRAP: &str = r#"{
    "name": "bare",
    "functions": [{
        "name": "main",
        "ret": "I64",
        "blocks": [{
            "label": "entry",
            "instructions": [
                { "op": "Trap", "ty": "Void", "loc": { "file_id": 0, "line": 1, "col": 0 } }
            ]
        }]
    }]
}"#;

const RETURNS_SEVEN: &str = r#"{
    "name": "seven",
    "functions": [{
        "name": "main",
        "ret": "I64",
        "blocks": [{
            "label": "entry",
            "instructions": [{ "op": "Ret", "ty": "Void", "operands": [{ "Const": { "I64": 7 } }] }]
        }]
    }]
}"#;

#[test]
fn trap_sets_exit_status_and_prints_diagnostic() {
    let dir = TempDir::new().expect("temp dir");
    let out = run_cli(dir.path(), "bare.json", BARE_TRAP, &[]);
    assert_eq!(out.status.code(), Some(TrapKind::DomainError.exit_status()));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("Trap @main:entry#0 line 1: DomainError (code=0)"),
        "stderr was: {stderr}"
    );
}

#[test]
fn main_return_value_becomes_exit_status() {
    let dir = TempDir::new().expect("temp dir");
    for dispatch in ["switch", "threaded"] {
        let out = run_cli(dir.path(), "seven.json", RETURNS_SEVEN, &["--dispatch", dispatch]);
        assert_eq!(out.status.code(), Some(7));
    }
}

#[test]
fn invalid_dispatch_env_falls_back_with_a_warning() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("seven.json");
    fs::write(&path, RETURNS_SEVEN).expect("module file written");
    for (value, warns) in [("bogus", true), ("THREADED", false)] {
        let out = Command::new(env!("CARGO_BIN_EXE_viper"))
            .arg("run")
            .arg(&path)
            .env("VIPER_DISPATCH", value)
            .env_remove("RUST_LOG")
            .output()
            .expect("viper binary runs");
        assert_eq!(out.status.code(), Some(7));
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert_eq!(stderr.contains("ignoring invalid dispatch setting"), warns, "{stderr}");
    }
}

#[test]
fn label_break_exits_with_pause_status() {
    let dir = TempDir::new().expect("temp dir");
    let out = run_cli(dir.path(), "seven.json", RETURNS_SEVEN, &["--break", "entry"]);
    assert_eq!(out.status.code(), Some(10));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("[BREAK] fn=@main blk=entry reason=label"));
}

#[test]
fn unreadable_module_is_a_usage_error() {
    let dir = TempDir::new().expect("temp dir");
    let out = Command::new(env!("CARGO_BIN_EXE_viper"))
        .arg("run")
        .arg(dir.path().join("missing.json"))
        .output()
        .expect("viper binary runs");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("error: failed to read"));
}
