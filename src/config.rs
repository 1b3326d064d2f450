// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Engine tunables, layered from defaults, config files and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::lsp::protocol::DEFAULT_MAX_FRAME_BYTES;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Timeouts and limits for a session.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Default deadline for each request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for the `initialize` handshake, in milliseconds.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// How long shutdown waits for the server to exit before killing it.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Largest frame body accepted from the server, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

const fn default_init_timeout_ms() -> u64 {
    DEFAULT_INIT_TIMEOUT_MS
}

const fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

const fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl EngineConfig {
    /// Load configuration from standard paths or a specific file.
    ///
    /// Later layers win: defaults, then `lsp-conduit/config.toml` in the
    /// user config directory, then `explicit_file`, then `CONDUIT_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or a value has the wrong type.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("request_timeout_ms", defaults.request_timeout_ms)?
            .set_default("init_timeout_ms", defaults.init_timeout_ms)?
            .set_default("shutdown_grace_ms", defaults.shutdown_grace_ms)?
            .set_default("max_frame_bytes", defaults.max_frame_bytes as u64)?;

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lsp-conduit").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("CONDUIT").try_parsing(true));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Default per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Handshake deadline.
    #[must_use]
    pub const fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Grace period between `exit` and a forced kill.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.init_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
        assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() -> Result<()> {
        let mut file = NamedTempFile::with_suffix(".toml")?;
        writeln!(file, "request_timeout_ms = 1500")?;
        writeln!(file, "max_frame_bytes = 65536")?;

        let config = EngineConfig::load(Some(file.path().to_path_buf()))?;
        assert_eq!(config.request_timeout_ms, 1500);
        assert_eq!(config.max_frame_bytes, 65536);
        Ok(())
    }

    #[test]
    fn test_bad_value_is_an_error() -> Result<()> {
        let mut file = NamedTempFile::with_suffix(".toml")?;
        writeln!(file, "request_timeout_ms = \"soon\"")?;
        assert!(EngineConfig::load(Some(file.path().to_path_buf())).is_err());
        Ok(())
    }
}
