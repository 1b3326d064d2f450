// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Integration tests for the `conduit` query commands, run against mockls.

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

const SOURCE: &str = "struct Greeter {\n    func greet() {}\n}\n";

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("Greeter.swift"), SOURCE).expect("write fixture");
    dir
}

/// Runs conduit with mockls as the server and returns (success, stdout JSON).
fn conduit(root: &Path, mockls_args: &[&str], query: &[&str]) -> (bool, Value) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conduit"));
    cmd.arg("--server").arg(env!("CARGO_BIN_EXE_mockls"));
    for arg in mockls_args {
        cmd.arg("--arg").arg(arg);
    }
    cmd.arg("--root").arg(root);
    cmd.args(query);
    cmd.current_dir(root);
    cmd.env("XDG_CONFIG_HOME", root);

    let output = cmd.output().expect("Failed to run conduit");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = serde_json::from_str(&stdout).unwrap_or(Value::Null);
    (output.status.success(), value)
}

#[test]
fn test_symbols_command() {
    let ws = workspace();
    let (ok, value) = conduit(ws.path(), &[], &["symbols", "Greeter.swift"]);
    assert!(ok);

    let symbols = value.as_array().expect("array of symbols");
    assert_eq!(symbols.len(), 2);
    assert_eq!(symbols[0]["name"], "Greeter");
    assert_eq!(symbols[0]["kind"], "struct");
    assert_eq!(symbols[1]["kind"], "function");
}

#[test]
fn test_definition_command() {
    let ws = workspace();
    let (ok, value) = conduit(ws.path(), &[], &["definition", "Greeter.swift", "0", "9"]);
    assert!(ok);
    assert_eq!(value[0]["range"]["start"]["line"], 0);
    assert_eq!(value[0]["range"]["start"]["character"], 7);
}

#[test]
fn test_all_reports_unsupported_features_inline() {
    let ws = workspace();
    let (ok, value) = conduit(
        ws.path(),
        &["--disable", "hover"],
        &["all", "Greeter.swift", "1", "10"],
    );
    assert!(ok);
    assert!(value["hover"]["error"].as_str().is_some());
    assert_eq!(value["symbols"][1]["name"], "greet");
    assert_eq!(value["status"]["state"], "running");
    assert_eq!(value["status"]["open_documents"], 1);
}

#[test]
fn test_rename_unsupported_fails() {
    let ws = workspace();
    let (ok, value) = conduit(
        ws.path(),
        &["--disable", "rename"],
        &["rename", "Greeter.swift", "0", "9", "Welcomer"],
    );
    assert!(!ok);
    assert_eq!(value, Value::Null);
}

#[test]
fn test_missing_server_fails() {
    let ws = workspace();
    let output = Command::new(env!("CARGO_BIN_EXE_conduit"))
        .args(["--server", "/nonexistent/server", "--root"])
        .arg(ws.path())
        .args(["symbols", "Greeter.swift"])
        .env("XDG_CONFIG_HOME", ws.path())
        .current_dir(ws.path())
        .output()
        .expect("Failed to run conduit");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/server"), "stderr: {stderr}");
}
