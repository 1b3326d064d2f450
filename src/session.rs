// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A session with one language server process.
//!
//! [`Session`] is the typed query surface. Each query checks the lifecycle
//! state and the advertised capability, makes sure the target document is
//! open, sends the request and maps the raw result. Background tasks hold
//! only the shared state, never the session itself, so dropping the session
//! tears everything down.

use lsp_types::{
    DocumentSymbolParams, GotoDefinitionParams, HoverParams, Location, PartialResultParams,
    Position, RenameParams, ServerCapabilities, TextDocumentIdentifier,
    TextDocumentPositionParams, Uri, WorkDoneProgressParams, WorkspaceSymbolParams,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Feature, Result};
use crate::lsp::capabilities::{self, Capabilities};
use crate::lsp::correlator::{CloseReason, Correlator, RequestOptions};
use crate::lsp::documents::{ContentSource, DocumentSync, FsContentSource};
use crate::lsp::inbound;
use crate::lsp::process::{ServerLaunchSpec, ServerProcess};
use crate::lsp::protocol::{Message, MessageReader};
use crate::lsp::state::{LifecycleState, ProgressTracker, SessionStatus, StateCell};
use crate::types::{self, HoverInfo, RenameEdits, Symbol, WorkspaceSymbolMatch};

/// How long the reader waits for an exit status after stdout closes.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(200);

/// State shared between the session and its background tasks.
struct Shared {
    state: StateCell,
    correlator: Arc<Correlator>,
    capabilities: Capabilities,
    documents: DocumentSync,
    progress: Mutex<ProgressTracker>,
    crash_status: OnceLock<Option<String>>,
}

impl Shared {
    /// Called by whichever detector notices the server is gone first.
    fn server_gone(&self, status: Option<String>) {
        match self.state.transition(LifecycleState::Crashed) {
            Ok(previous) => {
                warn!(
                    "Language server exited unexpectedly while {:?}: {}",
                    previous,
                    status.as_deref().unwrap_or("unknown status")
                );
                let _ = self.crash_status.set(status.clone());
                let failed = self.correlator.close(CloseReason::Crashed(status));
                if failed > 0 {
                    debug!("Failed {} pending requests after crash", failed);
                }
                self.progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
            Err(state) => debug!("Language server exit observed in state {:?}", state),
        }
    }
}

/// A running language server and the typed queries it answers.
pub struct Session {
    shared: Arc<Shared>,
    process: tokio::sync::Mutex<ServerProcess>,
    config: EngineConfig,
    language_id: String,
    started: Instant,
    reader: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Session {
    /// Launches the server, completes the handshake and returns a running
    /// session. Documents are read from the local file system.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Launch`] if the server cannot be started and
    /// [`EngineError::Initialization`] if the handshake fails.
    pub async fn start(spec: ServerLaunchSpec, config: EngineConfig) -> Result<Self> {
        Self::start_with_source(spec, config, Arc::new(FsContentSource)).await
    }

    /// Like [`Session::start`], reading documents from `source`.
    ///
    /// # Errors
    ///
    /// See [`Session::start`].
    pub async fn start_with_source(
        spec: ServerLaunchSpec,
        config: EngineConfig,
        source: Arc<dyn ContentSource>,
    ) -> Result<Self> {
        let (process, io) = ServerProcess::spawn(&spec)?;
        let correlator = Arc::new(Correlator::new(io.stdin, config.request_timeout()));

        let shared = Arc::new(Shared {
            state: StateCell::new(),
            correlator: correlator.clone(),
            capabilities: Capabilities::new(),
            documents: DocumentSync::new(correlator, source, spec.language_id.clone()),
            progress: Mutex::new(ProgressTracker::new()),
            crash_status: OnceLock::new(),
        });
        shared
            .state
            .transition(LifecycleState::Initializing)
            .map_err(EngineError::NotReady)?;

        let reader = tokio::spawn(read_loop(
            shared.clone(),
            MessageReader::new(io.stdout, config.max_frame_bytes),
            process.exit_watch(),
        ));
        let watcher = tokio::spawn(watch_exit(shared.clone(), process.exit_watch()));

        let session = Self {
            shared,
            process: tokio::sync::Mutex::new(process),
            language_id: spec.language_id.clone(),
            config,
            started: Instant::now(),
            reader,
            watcher,
        };

        let handshake = capabilities::initialize(
            &session.shared.correlator,
            &spec.root_uri,
            capabilities::client_capabilities(),
            session.config.init_timeout(),
        )
        .await;

        match handshake {
            Ok(result) => {
                session.shared.capabilities.record(result.capabilities);
                if let Err(state) = session.shared.state.transition(LifecycleState::Running) {
                    return Err(EngineError::Initialization(format!(
                        "server left initialization in state {state:?}"
                    )));
                }
                info!("Language server for {} is running", session.language_id);
                Ok(session)
            }
            Err(e) => {
                warn!("Initialization of {} failed: {}", spec.command, e);
                session.abort().await;
                Err(e)
            }
        }
    }

    /// Tears down a session that never reached `Running`.
    async fn abort(&self) {
        let _ = self.shared.state.transition(LifecycleState::ShuttingDown);
        self.shared.correlator.close(CloseReason::Shutdown);
        self.process.lock().await.kill().await;
        let _ = self.shared.state.transition(LifecycleState::Stopped);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.state.get()
    }

    /// Language id documents are opened with.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Capabilities the server advertised during the handshake.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.shared.capabilities.get()
    }

    /// Whether the server advertised `feature`.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        self.shared.capabilities.supports(feature)
    }

    /// Snapshot for display.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let progress = self
            .shared
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let primary = progress.primary_progress();

        SessionStatus {
            language: self.language_id.clone(),
            state: self.shared.state.get(),
            progress_title: primary.map(|p| p.title.clone()),
            progress_message: primary.and_then(|p| p.message.clone()),
            progress_percentage: primary.and_then(|p| p.percentage),
            open_documents: self.shared.documents.open_count(),
            pending_requests: self.shared.correlator.pending_count(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.shared.state.get() {
            LifecycleState::Running => Ok(()),
            LifecycleState::Crashed => Err(EngineError::ServerCrashed {
                status: self.shared.crash_status.get().cloned().flatten(),
            }),
            LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                Err(EngineError::SessionClosed)
            }
            state => Err(EngineError::NotReady(state)),
        }
    }

    /// Opens `uri` on the server unless it already is.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the document cannot be read.
    pub async fn ensure_open(&self, uri: &Uri) -> Result<()> {
        self.ensure_running()?;
        self.shared.documents.ensure_open(uri).await.map(|_| ())
    }

    /// Sends new full content for an open document. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DocumentNotOpen`] if `uri` was never opened.
    pub async fn notify_changed(&self, uri: &Uri, content: impl Into<String>) -> Result<i32> {
        self.ensure_running()?;
        self.shared.documents.notify_changed(uri, content).await
    }

    /// Closes a document. Returns false if it was not open.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running or `didClose` cannot be sent.
    pub async fn close_document(&self, uri: &Uri) -> Result<bool> {
        self.ensure_running()?;
        self.shared.documents.close(uri).await
    }

    /// Closes documents not used within `max_idle` and returns their URIs.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running or a `didClose` cannot be sent.
    pub async fn close_idle_documents(&self, max_idle: Duration) -> Result<Vec<Uri>> {
        self.ensure_running()?;
        let idle = self.shared.documents.idle(max_idle).await;
        let mut closed = Vec::with_capacity(idle.len());
        for uri in idle {
            if self.shared.documents.close(&uri).await? {
                debug!("Closed idle document {}", uri.as_str());
                closed.push(uri);
            }
        }
        Ok(closed)
    }

    async fn query<P: Serialize + Sync>(
        &self,
        feature: Feature,
        target: Option<&Uri>,
        params: &P,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.ensure_running()?;
        self.shared.capabilities.require(feature)?;
        if let Some(uri) = target {
            self.shared.documents.ensure_open(uri).await?;
        }

        let params = serde_json::to_value(params)?;
        self.shared
            .correlator
            .send_with(feature.method(), Some(params), options)
            .await
    }

    fn position_params(uri: &Uri, position: Position) -> TextDocumentPositionParams {
        TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            position,
        }
    }

    /// Where the symbol at `position` is defined.
    ///
    /// # Errors
    ///
    /// See [`Session::definition_with`].
    pub async fn definition(&self, uri: &Uri, position: Position) -> Result<Vec<Location>> {
        self.definition_with(uri, position, &RequestOptions::default())
            .await
    }

    /// [`Session::definition`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] if the server has no
    /// definition provider, plus any transport, timeout or cancellation error.
    pub async fn definition_with(
        &self,
        uri: &Uri,
        position: Position,
        options: &RequestOptions,
    ) -> Result<Vec<Location>> {
        let params = GotoDefinitionParams {
            text_document_position_params: Self::position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self
            .query(Feature::Definition, Some(uri), &params, options)
            .await?;
        types::locations(result)
    }

    /// Hover information at `position`, if any.
    ///
    /// # Errors
    ///
    /// See [`Session::hover_with`].
    pub async fn hover(&self, uri: &Uri, position: Position) -> Result<Option<HoverInfo>> {
        self.hover_with(uri, position, &RequestOptions::default())
            .await
    }

    /// [`Session::hover`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] if the server has no
    /// hover provider, plus any transport, timeout or cancellation error.
    pub async fn hover_with(
        &self,
        uri: &Uri,
        position: Position,
        options: &RequestOptions,
    ) -> Result<Option<HoverInfo>> {
        let params = HoverParams {
            text_document_position_params: Self::position_params(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self
            .query(Feature::Hover, Some(uri), &params, options)
            .await?;
        types::hover(result)
    }

    /// The outline of a document.
    ///
    /// # Errors
    ///
    /// See [`Session::document_symbols_with`].
    pub async fn document_symbols(&self, uri: &Uri) -> Result<Vec<Symbol>> {
        self.document_symbols_with(uri, &RequestOptions::default())
            .await
    }

    /// [`Session::document_symbols`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] if the server has no
    /// document symbol provider, plus any transport, timeout or cancellation error.
    pub async fn document_symbols_with(
        &self,
        uri: &Uri,
        options: &RequestOptions,
    ) -> Result<Vec<Symbol>> {
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self
            .query(Feature::DocumentSymbols, Some(uri), &params, options)
            .await?;
        types::symbols(result)
    }

    /// Edits that rename the symbol at `position` to `new_name`.
    ///
    /// # Errors
    ///
    /// See [`Session::rename_with`].
    pub async fn rename(
        &self,
        uri: &Uri,
        position: Position,
        new_name: &str,
    ) -> Result<RenameEdits> {
        self.rename_with(uri, position, new_name, &RequestOptions::default())
            .await
    }

    /// [`Session::rename`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] without contacting the
    /// server if it has no rename provider, plus any transport, timeout or
    /// cancellation error.
    pub async fn rename_with(
        &self,
        uri: &Uri,
        position: Position,
        new_name: &str,
        options: &RequestOptions,
    ) -> Result<RenameEdits> {
        let params = RenameParams {
            text_document_position: Self::position_params(uri, position),
            new_name: new_name.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self
            .query(Feature::Rename, Some(uri), &params, options)
            .await?;
        types::rename_edits(result)
    }

    /// Symbols across the workspace matching `query`.
    ///
    /// # Errors
    ///
    /// See [`Session::workspace_symbols_with`].
    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbolMatch>> {
        self.workspace_symbols_with(query, &RequestOptions::default())
            .await
    }

    /// [`Session::workspace_symbols`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] if the server has no
    /// workspace symbol provider, plus any transport, timeout or cancellation error.
    pub async fn workspace_symbols_with(
        &self,
        query: &str,
        options: &RequestOptions,
    ) -> Result<Vec<WorkspaceSymbolMatch>> {
        let params = WorkspaceSymbolParams {
            partial_result_params: PartialResultParams::default(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            query: query.to_string(),
        };
        let result = self
            .query(Feature::WorkspaceSymbols, None, &params, options)
            .await?;
        types::workspace_symbols(result)
    }

    /// Shuts the server down: fails pending requests, closes documents,
    /// sends `shutdown` and `exit`, and kills the process if it outlives the
    /// grace period.
    ///
    /// Calling this more than once, or after a crash, is a no-op.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; failures along the way are logged.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(state) = self.shared.state.transition(LifecycleState::ShuttingDown) {
            debug!("Shutdown requested in state {:?}; nothing to do", state);
            if state == LifecycleState::Crashed {
                self.process.lock().await.kill().await;
            }
            return Ok(());
        }

        info!("Shutting down language server for {}", self.language_id);
        let grace = self.config.shutdown_grace();

        let failed = self.shared.correlator.fail_pending(&CloseReason::Shutdown);
        if failed > 0 {
            debug!("Cancelled {} pending requests for shutdown", failed);
        }

        for uri in self.shared.documents.open_uris().await {
            if let Err(e) = self.shared.documents.close(&uri).await {
                debug!("Failed to close {} during shutdown: {}", uri.as_str(), e);
            }
        }

        // Servers answer shutdown with null, true, or nothing at all.
        if let Err(e) = self
            .shared
            .correlator
            .send_with("shutdown", None, &RequestOptions::timeout(grace))
            .await
        {
            debug!("Shutdown request failed: {}", e);
        }
        if let Err(e) = self.shared.correlator.notify("exit", None) {
            debug!("Exit notification failed: {}", e);
        }

        let mut process = self.process.lock().await;
        match process.wait_exit(grace).await {
            Some(status) => debug!("Language server exited: {}", status),
            None => {
                warn!(
                    "Language server for {} did not exit within {:?}; killing it",
                    self.language_id, grace
                );
                process.kill().await;
            }
        }

        self.shared.correlator.close(CloseReason::Shutdown);
        self.shared.documents.clear().await;
        self.shared
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Err(state) = self.shared.state.transition(LifecycleState::Stopped) {
            error!("Unexpected state {:?} at end of shutdown", state);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self
            .shared
            .state
            .transition(LifecycleState::ShuttingDown)
            .is_ok()
        {
            debug!(
                "Session for {} dropped without shutdown; killing server",
                self.language_id
            );
        }
        self.shared.correlator.close(CloseReason::Shutdown);
        self.reader.abort();
        self.watcher.abort();
    }
}

/// The single reader of the server's stdout.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: MessageReader<ChildStdout>,
    mut exit: watch::Receiver<Option<String>>,
) {
    loop {
        match reader.next_message().await {
            Ok(Some(message)) => dispatch(&shared, message),
            Ok(None) => {
                debug!("LSP stdout closed");
                break;
            }
            Err(EngineError::Protocol(e)) => warn!("Discarding malformed message: {}", e),
            Err(e) => {
                error!("Error reading from LSP stdout: {}", e);
                break;
            }
        }
    }

    let status = match tokio::time::timeout(EXIT_STATUS_WAIT, exit.wait_for(Option::is_some)).await
    {
        Ok(Ok(status)) => status.clone(),
        _ => None,
    };
    shared.server_gone(status);
}

fn dispatch(shared: &Shared, message: Message) {
    match message {
        Message::Response(response) => {
            if let Err(e) = shared.correlator.handle_response(response) {
                warn!("{}", e);
            }
        }
        Message::Request(request) => {
            let reply = Message::Response(inbound::reply_to(&request));
            if let Err(e) = shared.correlator.post(&reply) {
                warn!("Failed to answer server request: {}", e);
            }
        }
        Message::Notification(notification) => {
            inbound::handle_notification(&notification, &shared.progress);
        }
    }
}

/// Marks the session crashed as soon as the process exits.
async fn watch_exit(shared: Arc<Shared>, mut exit: watch::Receiver<Option<String>>) {
    let status = match exit.wait_for(Option::is_some).await {
        Ok(status) => status.clone(),
        Err(_) => None,
    };
    shared.server_gone(status);
}
