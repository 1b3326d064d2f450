// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for configuration loading and merging.
//!
//! Runs `conduit config`, which prints the effective configuration, with a
//! private config home so the user's own files never leak in.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Command;

fn conduit_config(config_home: &Path, extra: &[&str], env: &[(&str, &str)]) -> Result<Value> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conduit"));
    cmd.arg("config").args(extra);
    cmd.env("XDG_CONFIG_HOME", config_home);
    cmd.env_remove("CONDUIT_REQUEST_TIMEOUT_MS");
    cmd.env_remove("CONDUIT_SHUTDOWN_GRACE_MS");
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd.output().context("Failed to run conduit")?;
    anyhow::ensure!(
        output.status.success(),
        "conduit config failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).context("conduit config did not print JSON")
}

#[test]
fn test_defaults_without_files() -> Result<()> {
    let home = tempfile::tempdir()?;
    let config = conduit_config(home.path(), &[], &[])?;
    assert_eq!(config["request_timeout_ms"], 30_000);
    assert_eq!(config["init_timeout_ms"], 30_000);
    assert_eq!(config["shutdown_grace_ms"], 2_000);
    assert_eq!(config["max_frame_bytes"], 4 * 1024 * 1024);
    Ok(())
}

#[test]
fn test_layers_apply_in_order() -> Result<()> {
    let home = tempfile::tempdir()?;
    let user_dir = home.path().join("lsp-conduit");
    std::fs::create_dir_all(&user_dir)?;
    std::fs::write(
        user_dir.join("config.toml"),
        "request_timeout_ms = 1000\ninit_timeout_ms = 1000\nshutdown_grace_ms = 1000\n",
    )?;

    let explicit = home.path().join("explicit.toml");
    std::fs::write(&explicit, "init_timeout_ms = 2000\nshutdown_grace_ms = 2500\n")?;
    let explicit = explicit.to_string_lossy().into_owned();

    let config = conduit_config(
        home.path(),
        &["--config", &explicit],
        &[("CONDUIT_SHUTDOWN_GRACE_MS", "3000")],
    )?;

    // user file < explicit file < environment
    assert_eq!(config["request_timeout_ms"], 1000);
    assert_eq!(config["init_timeout_ms"], 2000);
    assert_eq!(config["shutdown_grace_ms"], 3000);
    Ok(())
}

#[test]
fn test_invalid_environment_value_fails() -> Result<()> {
    let home = tempfile::tempdir()?;
    let output = Command::new(env!("CARGO_BIN_EXE_conduit"))
        .arg("config")
        .env("XDG_CONFIG_HOME", home.path())
        .env("CONDUIT_REQUEST_TIMEOUT_MS", "soon")
        .output()
        .context("Failed to run conduit")?;
    assert!(!output.status.success());
    Ok(())
}
