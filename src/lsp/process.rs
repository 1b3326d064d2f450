// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Language server subprocess supervision.
//!
//! A supervisor task owns the [`Child`] and publishes its exit status on a
//! watch channel, so crash detection does not depend on anyone polling.
//! Dropping the [`ServerProcess`] kills the child.

use lsp_types::Uri;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// How to launch a language server for one workspace.
#[derive(Debug, Clone)]
pub struct ServerLaunchSpec {
    /// Executable name or path. Bare names are resolved through `PATH`.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the process, if different from ours.
    pub working_directory: Option<PathBuf>,
    /// Workspace root sent in `initialize`.
    pub root_uri: Uri,
    /// Language id used when opening documents.
    pub language_id: String,
}

impl ServerLaunchSpec {
    /// A spec with no arguments and the current working directory.
    pub fn new(command: impl Into<String>, root_uri: Uri, language_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_directory: None,
            root_uri,
            language_id: language_id.into(),
        }
    }

    /// Replaces the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// The child's stdio, handed to whoever speaks the protocol.
pub struct ServerIo {
    /// Client → server.
    pub stdin: ChildStdin,
    /// Server → client.
    pub stdout: ChildStdout,
}

/// Handle to a running server process.
pub struct ServerProcess {
    command: String,
    pid: Option<u32>,
    exit: watch::Receiver<Option<String>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ServerProcess {
    /// Resolves and spawns the server described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Launch`] if the executable cannot be found or
    /// the process cannot be started.
    pub fn spawn(spec: &ServerLaunchSpec) -> Result<(Self, ServerIo)> {
        let launch_error = |reason: String| EngineError::Launch {
            command: spec.command.clone(),
            reason,
        };

        let program = which::which(&spec.command)
            .map_err(|e| launch_error(format!("not found in PATH: {e}")))?;

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| launch_error(e.to_string()))?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(launch_error("stdio was not captured".to_string()));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(spec.command.clone(), stderr));
        }

        debug!(
            "Spawned language server {} (pid {:?}) {:?}",
            program.display(),
            pid,
            spec.args
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(spec.command.clone(), child, kill_rx, exit_tx));

        Ok((
            Self {
                command: spec.command.clone(),
                pid,
                exit: exit_rx,
                kill: Some(kill_tx),
            },
            ServerIo { stdin, stdout },
        ))
    }

    /// OS process id, if the process was running when spawned.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit status, once the process has exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<String> {
        self.exit.borrow().clone()
    }

    /// A receiver that changes to `Some(status)` when the process exits.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<String>> {
        self.exit.clone()
    }

    /// Waits up to `timeout` for the process to exit on its own.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<String> {
        let mut exit = self.exit.clone();
        let status = match tokio::time::timeout(timeout, exit.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => status.clone(),
            _ => None,
        };
        status
    }

    /// Kills the process and waits for the supervisor to observe the exit.
    pub async fn kill(&mut self) -> Option<String> {
        if let Some(kill) = self.kill.take() {
            debug!("Killing language server {}", self.command);
            let _ = kill.send(());
        }
        let mut exit = self.exit.clone();
        let status = match exit.wait_for(Option::is_some).await {
            Ok(status) => status.clone(),
            Err(_) => None,
        };
        status
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Owns the child until it exits, either on its own or when told to die.
async fn supervise(
    command: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<String>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill {}: {}", command, e);
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => status.to_string(),
        Err(e) => {
            warn!("Failed to wait for {}: {}", command, e);
            format!("unknown exit status: {e}")
        }
    };
    debug!("Language server {} exited: {}", command, status);
    exit.send_replace(Some(status));
}

async fn drain_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("{} stderr: {}", command, line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {} stderr: {}", command, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Instant;

    fn spec(command: &str, args: &[&str]) -> ServerLaunchSpec {
        ServerLaunchSpec::new(command, Uri::from_str("file:///tmp").unwrap(), "swift")
            .with_args(args.iter().copied())
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let result = ServerProcess::spawn(&spec("definitely-not-a-language-server-xyz", &[]));
        let Err(EngineError::Launch { command, .. }) = result else {
            panic!("expected launch error");
        };
        assert_eq!(command, "definitely-not-a-language-server-xyz");
    }

    #[tokio::test]
    async fn test_exit_is_observed_without_polling() {
        let (process, _io) =
            ServerProcess::spawn(&spec("sh", &["-c", "echo noise >&2; exit 3"])).unwrap();
        let status = process.wait_exit(Duration::from_secs(5)).await;
        assert_eq!(status.as_deref(), Some("exit status: 3"));
        assert_eq!(process.exit_status().as_deref(), Some("exit status: 3"));
    }

    #[tokio::test]
    async fn test_kill_stops_a_hung_server() {
        let (mut process, _io) = ServerProcess::spawn(&spec("sleep", &["30"])).unwrap();
        assert!(process.pid().is_some());
        assert!(process.wait_exit(Duration::from_millis(50)).await.is_none());

        let started = Instant::now();
        let status = process.kill().await;
        assert!(status.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let (process, _io) = ServerProcess::spawn(&spec("sleep", &["30"])).unwrap();
        let mut exit = process.exit_watch();
        drop(process);

        let observed = tokio::time::timeout(Duration::from_secs(5), exit.wait_for(Option::is_some))
            .await
            .unwrap();
        assert!(observed.is_ok());
    }
}
