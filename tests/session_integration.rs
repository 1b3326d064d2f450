// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the session engine.
//!
//! Each test launches the `mockls` binary as a real subprocess. Its flags
//! shape capabilities, timing and failures, and `--record` leaves a log of
//! every message the engine sent so tests can check what went over the wire.

use anyhow::{Context, Result, anyhow, bail};
use lsp_types::{Position, SymbolKind, Uri};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use lsp_conduit::{
    CancelToken, EngineConfig, EngineError, Feature, LifecycleState, RequestOptions,
    ServerLaunchSpec, Session, path_to_uri,
};

const SOURCE: &str = "struct Greeter {
    func greet() -> String {
        return \"hello\"
    }
}

let greeter = Greeter()
";

/// A workspace with one Swift file and a record log for mockls.
struct Workspace {
    dir: TempDir,
    record: PathBuf,
    file: Uri,
}

impl Workspace {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Greeter.swift");
        std::fs::write(&path, SOURCE)?;
        let record = dir.path().join("record.log");
        let file = path_to_uri(&path)?;
        Ok(Self { dir, record, file })
    }

    fn spec(&self, args: &[&str]) -> Result<ServerLaunchSpec> {
        let mut all: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        all.push("--record".to_string());
        all.push(self.record.to_string_lossy().into_owned());
        Ok(
            ServerLaunchSpec::new(env!("CARGO_BIN_EXE_mockls"), self.root()?, "swift")
                .with_args(all)
                .with_working_directory(self.dir.path()),
        )
    }

    fn root(&self) -> Result<Uri> {
        Ok(path_to_uri(self.dir.path())?)
    }

    async fn start(&self, args: &[&str]) -> Result<Session> {
        self.start_with(args, test_config()).await
    }

    async fn start_with(&self, args: &[&str], config: EngineConfig) -> Result<Session> {
        Session::start(self.spec(args)?, config)
            .await
            .context("Failed to start session against mockls")
    }

    /// Every line mockls recorded so far.
    fn recorded(&self) -> Vec<String> {
        read_lines(&self.record)
    }

    fn count(&self, method: &str) -> usize {
        self.recorded().iter().filter(|m| *m == method).count()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn test_config() -> EngineConfig {
    EngineConfig {
        request_timeout_ms: 10_000,
        init_timeout_ms: 10_000,
        shutdown_grace_ms: 1_000,
        ..EngineConfig::default()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_document_symbols_opens_document_once() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;
    assert_eq!(session.state(), LifecycleState::Running);

    let symbols = session.document_symbols(&ws.file).await?;
    let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Greeter", "greet", "greeter"]);
    assert_eq!(symbols[0].kind, SymbolKind::STRUCT);
    assert_eq!(symbols[1].kind, SymbolKind::FUNCTION);

    // A second query reuses the open document.
    session.document_symbols(&ws.file).await?;
    assert_eq!(ws.count("textDocument/didOpen"), 1);

    let recorded = ws.recorded();
    assert_eq!(recorded[0], "initialize");
    assert_eq!(recorded[1], "initialized");

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_definition_and_hover() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;

    let locations = session.definition(&ws.file, Position::new(6, 15)).await?;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].uri, ws.file);
    assert_eq!(locations[0].range.start, Position::new(0, 7));
    assert_eq!(locations[0].range.end, Position::new(0, 14));

    let hover = session
        .hover(&ws.file, Position::new(1, 10))
        .await?
        .context("Expected hover contents")?;
    assert_eq!(hover.contents, "```swift\ngreet\n```");

    // Blank line: mockls has nothing to say.
    assert!(session.hover(&ws.file, Position::new(5, 0)).await?.is_none());

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_rename_returns_edits_per_document() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;

    let edits = session
        .rename(&ws.file, Position::new(0, 7), "Welcomer")
        .await?;
    let file_edits = edits.get(&ws.file).context("No edits for the file")?;
    assert_eq!(file_edits.len(), 2);
    assert!(file_edits.iter().all(|e| e.new_text == "Welcomer"));
    let lines: Vec<_> = file_edits.iter().map(|e| e.range.start.line).collect();
    assert_eq!(lines, [0, 6]);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_workspace_symbols() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;
    session.ensure_open(&ws.file).await?;

    let mut matches = session.workspace_symbols("greet").await?;
    matches.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["greet", "greeter"]);
    assert!(matches.iter().all(|m| m.uri == ws.file && m.range.is_some()));

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_capability_sends_nothing() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&["--disable", "rename"]).await?;

    assert!(!session.supports(Feature::Rename));
    assert!(session.supports(Feature::Hover));

    match session.rename(&ws.file, Position::new(0, 7), "X").await {
        Err(EngineError::UnsupportedCapability(Feature::Rename)) => {}
        other => bail!("Expected UnsupportedCapability, got {other:?}"),
    }

    session.shutdown().await?;
    let recorded = ws.recorded();
    assert!(!recorded.iter().any(|m| m == "textDocument/rename"));
    assert!(!recorded.iter().any(|m| m == "textDocument/didOpen"));
    Ok(())
}

#[tokio::test]
async fn test_timeout_then_late_response_is_discarded() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws
        .start(&["--delay-on", "textDocument/hover=400"])
        .await?;

    let started = Instant::now();
    let result = session
        .hover_with(
            &ws.file,
            Position::new(0, 9),
            &RequestOptions::timeout(Duration::from_millis(50)),
        )
        .await;
    match result {
        Err(EngineError::Timeout { method, .. }) => assert_eq!(method, "textDocument/hover"),
        other => bail!("Expected Timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_millis(400));

    // Let the late response arrive; it must not disturb the session.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(session.state(), LifecycleState::Running);
    assert_eq!(session.status().pending_requests, 0);

    let symbols = session.document_symbols(&ws.file).await?;
    assert_eq!(symbols.len(), 3);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws
        .start(&["--delay-on", "textDocument/definition=300"])
        .await?;

    let definition = async {
        let result = session.definition(&ws.file, Position::new(6, 15)).await;
        (result, Instant::now())
    };
    let hover = async {
        let result = session.hover(&ws.file, Position::new(1, 10)).await;
        (result, Instant::now())
    };
    let ((definition, definition_done), (hover, hover_done)) = tokio::join!(definition, hover);

    assert!(hover_done < definition_done);
    assert_eq!(definition?[0].range.start, Position::new(0, 7));
    let hover = hover?.context("Expected hover contents")?;
    assert!(hover.contents.contains("greet"));

    // Both queries raced to open the file; only one didOpen went out.
    assert_eq!(ws.count("textDocument/didOpen"), 1);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_crash_fails_every_pending_request() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws
        .start(&["--hang-on", "textDocument/hover", "--crash-after", "500"])
        .await?;

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        session.hover(&ws.file, Position::new(0, 9)),
        session.hover(&ws.file, Position::new(1, 10)),
        session.hover(&ws.file, Position::new(6, 5)),
    );
    for result in [a, b, c] {
        match result {
            Err(EngineError::ServerCrashed { .. }) => {}
            other => bail!("Expected ServerCrashed, got {other:?}"),
        }
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), LifecycleState::Crashed);

    match session.document_symbols(&ws.file).await {
        Err(EngineError::ServerCrashed { status }) => {
            if let Some(status) = status {
                assert!(status.contains('1'), "unexpected status: {status}");
            }
        }
        other => bail!("Expected ServerCrashed, got {other:?}"),
    }

    // Shutting down a crashed session is harmless.
    session.shutdown().await?;
    assert_eq!(session.state(), LifecycleState::Crashed);
    Ok(())
}

#[tokio::test]
async fn test_drop_after_is_detected_as_crash() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&["--drop-after", "2"]).await?;

    // The second response is written before mockls exits.
    session.document_symbols(&ws.file).await?;

    assert!(
        wait_for(Duration::from_secs(3), || session.state() == LifecycleState::Crashed).await,
        "Session did not notice the server exit"
    );
    assert!(matches!(
        session.hover(&ws.file, Position::new(0, 9)).await,
        Err(EngineError::ServerCrashed { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_is_idempotent() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;
    session.ensure_open(&ws.file).await?;

    session.shutdown().await?;
    assert_eq!(session.state(), LifecycleState::Stopped);
    session.shutdown().await?;
    assert_eq!(session.state(), LifecycleState::Stopped);

    match session.hover(&ws.file, Position::new(0, 9)).await {
        Err(EngineError::SessionClosed) => {}
        other => bail!("Expected SessionClosed, got {other:?}"),
    }

    let recorded = ws.recorded();
    let tail: Vec<_> = recorded.iter().rev().take(3).rev().cloned().collect();
    assert_eq!(tail, ["textDocument/didClose", "shutdown", "exit"]);
    assert_eq!(ws.count("shutdown"), 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_kills_unresponsive_server() -> Result<()> {
    let ws = Workspace::new()?;
    let config = EngineConfig {
        shutdown_grace_ms: 200,
        ..test_config()
    };
    // mockls ignores the shutdown request but still honours exit.
    let session = ws.start_with(&["--hang-on", "shutdown"], config).await?;

    let started = Instant::now();
    session.shutdown().await?;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(session.state(), LifecycleState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_launch_error() -> Result<()> {
    let ws = Workspace::new()?;
    let spec = ServerLaunchSpec::new("/nonexistent/conduit-test-server", ws.root()?, "swift");
    match Session::start(spec, test_config()).await {
        Err(EngineError::Launch { command, .. }) => {
            assert_eq!(command, "/nonexistent/conduit-test-server");
        }
        Err(other) => bail!("Expected Launch error, got {other:?}"),
        Ok(_) => bail!("Expected Launch error, session started"),
    }
    Ok(())
}

#[tokio::test]
async fn test_failed_initialize_is_initialization_error() -> Result<()> {
    let ws = Workspace::new()?;
    match ws.start(&["--fail-on", "initialize"]).await {
        Err(e) => match e.downcast_ref::<EngineError>() {
            Some(EngineError::Initialization(_)) => {}
            _ => bail!("Expected Initialization error, got {e:?}"),
        },
        Ok(_) => bail!("Expected initialization to fail"),
    }
    assert_eq!(ws.count("initialized"), 0);
    Ok(())
}

#[tokio::test]
async fn test_initialize_timeout() -> Result<()> {
    let ws = Workspace::new()?;
    let config = EngineConfig {
        init_timeout_ms: 200,
        ..test_config()
    };
    let started = Instant::now();
    let err = ws
        .start_with(&["--hang-on", "initialize"], config)
        .await
        .err()
        .ok_or_else(|| anyhow!("Expected initialization to time out"))?;
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Initialization(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn test_cancellation_sends_cancel_request() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&["--hang-on", "textDocument/hover"]).await?;

    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let options = RequestOptions::default().with_cancel(token);
    match session
        .hover_with(&ws.file, Position::new(0, 9), &options)
        .await
    {
        Err(EngineError::Cancelled { method, .. }) => assert_eq!(method, "textDocument/hover"),
        other => bail!("Expected Cancelled, got {other:?}"),
    }

    assert!(
        wait_for(Duration::from_secs(2), || ws.count("$/cancelRequest") == 1).await,
        "mockls never saw $/cancelRequest: {:?}",
        ws.recorded()
    );

    // The session stays usable.
    assert_eq!(session.document_symbols(&ws.file).await?.len(), 3);
    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_configuration_request_is_answered() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&["--send-configuration-request"]).await?;

    let answered = wait_for(Duration::from_secs(2), || {
        ws.recorded().iter().any(|l| l.starts_with("response:"))
    })
    .await;
    assert!(answered, "No reply recorded: {:?}", ws.recorded());

    let reply = ws
        .recorded()
        .into_iter()
        .find(|l| l.starts_with("response:"))
        .context("reply line")?;
    assert_eq!(reply, "response:1 [null]");

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_progress_is_reported_in_status() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&["--indexing-delay", "800"]).await?;

    let indexing = wait_for(Duration::from_secs(2), || {
        session.status().progress_title.as_deref() == Some("Indexing")
    })
    .await;
    assert!(indexing, "Progress never began: {:?}", session.status());

    let finished = wait_for(Duration::from_secs(3), || {
        session.status().progress_title.is_none()
    })
    .await;
    assert!(finished, "Progress never ended: {:?}", session.status());

    // The workDoneProgress/create request was acknowledged with null.
    assert!(ws.recorded().iter().any(|l| l == "response:1 null"));

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_document_changes_and_idle_close() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;

    match session.notify_changed(&ws.file, "struct A {}\n").await {
        Err(EngineError::DocumentNotOpen(_)) => {}
        other => bail!("Expected DocumentNotOpen, got {other:?}"),
    }

    session.ensure_open(&ws.file).await?;
    let version = session
        .notify_changed(&ws.file, format!("{SOURCE}func farewell() {{}}\n"))
        .await?;
    assert_eq!(version, 2);

    let names: Vec<_> = session
        .document_symbols(&ws.file)
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names.last().map(String::as_str), Some("farewell"));
    assert_eq!(session.status().open_documents, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let closed = session
        .close_idle_documents(Duration::from_millis(10))
        .await?;
    assert_eq!(closed, [ws.file.clone()]);
    assert_eq!(session.status().open_documents, 0);
    assert!(
        wait_for(Duration::from_secs(1), || ws.count("textDocument/didClose") == 1).await
    );

    // Reopening continues the version sequence.
    session.ensure_open(&ws.file).await?;
    assert_eq!(session.notify_changed(&ws.file, SOURCE).await?, 4);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_not_found() -> Result<()> {
    let ws = Workspace::new()?;
    let session = ws.start(&[]).await?;

    let missing = path_to_uri(&ws.dir.path().join("Missing.swift"))?;
    match session.document_symbols(&missing).await {
        Err(EngineError::NotFound { .. }) => {}
        other => bail!("Expected NotFound, got {other:?}"),
    }
    assert_eq!(ws.count("textDocument/didOpen"), 0);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_deadlines_hold_when_server_stops_reading() -> Result<()> {
    let ws = Workspace::new()?;
    let big = ws.dir.path().join("Generated.swift");
    std::fs::write(&big, "let generated = 0\n".repeat(32 * 1024))?;
    let big = path_to_uri(&big)?;

    let config = EngineConfig {
        shutdown_grace_ms: 300,
        ..test_config()
    };
    let session = ws.start_with(&["--stop-reading"], config).await?;

    // didOpen alone is larger than the pipe buffer; the request queues behind it.
    let started = Instant::now();
    let result = session
        .hover_with(
            &big,
            Position::new(0, 5),
            &RequestOptions::timeout(Duration::from_millis(200)),
        )
        .await;
    assert!(
        matches!(result, Err(EngineError::Timeout { .. })),
        "Expected Timeout, got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));

    let started = Instant::now();
    session.shutdown().await?;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(session.state(), LifecycleState::Stopped);
    Ok(())
}
