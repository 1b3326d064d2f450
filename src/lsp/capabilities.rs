// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The initialize handshake and the capability set it produces.

use lsp_types::{
    ClientCapabilities, DocumentSymbolClientCapabilities, GeneralClientCapabilities,
    GotoCapability, HoverClientCapabilities, HoverProviderCapability, InitializeParams,
    InitializeResult, InitializedParams, MarkupKind, OneOf, PositionEncodingKind,
    RenameClientCapabilities, ServerCapabilities, TextDocumentClientCapabilities, Uri,
    WindowClientCapabilities, WorkspaceClientCapabilities, WorkspaceFolder,
    WorkspaceSymbolClientCapabilities,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::correlator::{Correlator, RequestOptions};
use crate::error::{EngineError, Feature, Result};

/// Server capabilities, recorded once after a successful handshake.
#[derive(Debug, Default)]
pub struct Capabilities {
    server: OnceLock<ServerCapabilities>,
}

impl Capabilities {
    /// An empty set: nothing is supported until [`Capabilities::record`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the server's capabilities. Returns false if they were
    /// already recorded; the first value wins.
    pub fn record(&self, capabilities: ServerCapabilities) -> bool {
        self.server.set(capabilities).is_ok()
    }

    /// The recorded capabilities, if the handshake has completed.
    #[must_use]
    pub fn get(&self) -> Option<&ServerCapabilities> {
        self.server.get()
    }

    /// Whether the server advertised `feature`.
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        let Some(caps) = self.server.get() else {
            return false;
        };
        match feature {
            Feature::Definition => one_of_enabled(caps.definition_provider.as_ref()),
            Feature::Hover => matches!(
                caps.hover_provider,
                Some(HoverProviderCapability::Simple(true) | HoverProviderCapability::Options(_))
            ),
            Feature::DocumentSymbols => one_of_enabled(caps.document_symbol_provider.as_ref()),
            Feature::Rename => one_of_enabled(caps.rename_provider.as_ref()),
            Feature::WorkspaceSymbols => one_of_enabled(caps.workspace_symbol_provider.as_ref()),
        }
    }

    /// Fails with [`EngineError::UnsupportedCapability`] unless `feature` is supported.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedCapability`] for unadvertised features.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(EngineError::UnsupportedCapability(feature))
        }
    }
}

const fn one_of_enabled<T>(provider: Option<&OneOf<bool, T>>) -> bool {
    matches!(provider, Some(OneOf::Left(true) | OneOf::Right(_)))
}

/// What this client tells the server it can handle.
///
/// Positions are exchanged in UTF-16 code units only.
#[must_use]
pub fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        general: Some(GeneralClientCapabilities {
            position_encodings: Some(vec![PositionEncodingKind::UTF16]),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(true),
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            rename: Some(RenameClientCapabilities {
                dynamic_registration: Some(false),
                prepare_support: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            configuration: Some(true),
            symbol: Some(WorkspaceSymbolClientCapabilities::default()),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workspace_name(root_uri: &Uri) -> String {
    root_uri
        .as_str()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.ends_with(':'))
        .unwrap_or("workspace")
        .to_string()
}

/// The local path of a `file:` root, if it has one.
fn root_path(root_uri: &Uri) -> Option<String> {
    let path = url::Url::parse(root_uri.as_str()).ok()?.to_file_path().ok()?;
    Some(path.to_string_lossy().into_owned())
}

/// Performs the `initialize` / `initialized` handshake.
///
/// `initialized` is only sent after a successful `initialize` response.
///
/// # Errors
///
/// Any failure along the way is reported as [`EngineError::Initialization`].
pub async fn initialize(
    correlator: &Correlator,
    root_uri: &Uri,
    capabilities: ClientCapabilities,
    timeout: Duration,
) -> Result<InitializeResult> {
    #[allow(deprecated, reason = "Many servers still locate the workspace by rootUri/rootPath")]
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(root_uri.clone()),
        root_path: root_path(root_uri),
        capabilities,
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: root_uri.clone(),
            name: workspace_name(root_uri),
        }]),
        ..Default::default()
    };

    let result: InitializeResult = correlator
        .request("initialize", &params, &RequestOptions::timeout(timeout))
        .await
        .map_err(|e| EngineError::Initialization(e.to_string()))?;

    match &result.capabilities.position_encoding {
        Some(encoding) if *encoding != PositionEncodingKind::UTF16 => {
            warn!(
                "Server chose position encoding {:?}; positions are sent as UTF-16",
                encoding.as_str()
            );
        }
        _ => debug!("Position encoding: utf-16"),
    }

    if let Some(info) = &result.server_info {
        debug!(
            "Initialized {} {}",
            info.name,
            info.version.as_deref().unwrap_or("")
        );
    }

    let initialized = serde_json::to_value(InitializedParams {})?;
    correlator
        .notify("initialized", Some(initialized))
        .map_err(|e| EngineError::Initialization(e.to_string()))?;

    Ok(result)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::protocol::{
        self, DEFAULT_MAX_FRAME_BYTES, Message, MessageReader, Response,
    };
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;
    use tokio::io::DuplexStream;

    fn caps(value: serde_json::Value) -> Capabilities {
        let set = Capabilities::new();
        assert!(set.record(serde_json::from_value(value).unwrap()));
        set
    }

    #[test]
    fn test_supports_bool_and_options_forms() {
        let set = caps(json!({
            "definitionProvider": true,
            "hoverProvider": { "workDoneProgress": false },
            "documentSymbolProvider": { "label": "outline" },
            "renameProvider": false,
        }));
        assert!(set.supports(Feature::Definition));
        assert!(set.supports(Feature::Hover));
        assert!(set.supports(Feature::DocumentSymbols));
        assert!(!set.supports(Feature::Rename));
        assert!(!set.supports(Feature::WorkspaceSymbols));
        assert!(matches!(
            set.require(Feature::Rename),
            Err(EngineError::UnsupportedCapability(Feature::Rename))
        ));
    }

    #[test]
    fn test_nothing_supported_before_handshake() {
        let set = Capabilities::new();
        assert!(!set.supports(Feature::Hover));
    }

    #[test]
    fn test_capabilities_are_immutable() {
        let set = caps(json!({ "hoverProvider": true }));
        assert!(!set.record(ServerCapabilities::default()));
        assert!(set.supports(Feature::Hover));
    }

    #[test]
    fn test_client_advertises_utf16_only() {
        let caps = client_capabilities();
        let encodings = caps.general.and_then(|g| g.position_encodings);
        assert_eq!(encodings, Some(vec![PositionEncodingKind::UTF16]));
    }

    #[test]
    fn test_workspace_name() {
        let uri = Uri::from_str("file:///home/dev/Project/").unwrap();
        assert_eq!(workspace_name(&uri), "Project");
        let root = Uri::from_str("file:///").unwrap();
        assert_eq!(workspace_name(&root), "workspace");
    }

    fn harness() -> (Arc<Correlator>, MessageReader<DuplexStream>, Uri) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let correlator = Arc::new(Correlator::new(client, Duration::from_secs(5)));
        let uri = Uri::from_str("file:///tmp/project").unwrap();
        (
            correlator,
            MessageReader::new(server, DEFAULT_MAX_FRAME_BYTES),
            uri,
        )
    }

    #[tokio::test]
    async fn test_initialized_follows_successful_response() {
        let (correlator, mut wire, uri) = harness();
        let uri_text = uri.as_str().to_string();
        let c = correlator.clone();
        let handshake = tokio::spawn(async move {
            initialize(&c, &uri, client_capabilities(), Duration::from_secs(5)).await
        });

        let Some(Message::Request(request)) = wire.next_message().await.unwrap() else {
            panic!("expected initialize request");
        };
        assert_eq!(request.method, "initialize");
        let params = request.params.clone().unwrap();
        assert_eq!(params["workspaceFolders"][0]["name"], "project");
        assert_eq!(params["rootUri"], uri_text);
        assert_eq!(params["rootPath"], "/tmp/project");

        correlator
            .handle_response(Response::success(
                request.id,
                json!({ "capabilities": { "hoverProvider": true } }),
            ))
            .unwrap();

        let result = handshake.await.unwrap().unwrap();
        assert!(result.capabilities.hover_provider.is_some());

        let Some(Message::Notification(n)) = wire.next_message().await.unwrap() else {
            panic!("expected initialized notification");
        };
        assert_eq!(n.method, "initialized");
    }

    #[tokio::test]
    async fn test_failed_initialize_sends_no_initialized() {
        let (correlator, mut wire, uri) = harness();
        let c = correlator.clone();
        let handshake = tokio::spawn(async move {
            initialize(&c, &uri, client_capabilities(), Duration::from_secs(5)).await
        });

        let Some(Message::Request(request)) = wire.next_message().await.unwrap() else {
            panic!("expected initialize request");
        };
        correlator
            .handle_response(Response::failure(
                request.id,
                protocol::INTERNAL_ERROR,
                "no workspace",
            ))
            .unwrap();

        let err = handshake.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Initialization(_)));
        assert!(err.is_fatal());

        drop(correlator);
        assert!(wire.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_timeout_is_initialization_error() {
        let (correlator, _wire, uri) = harness();
        let err = initialize(
            &correlator,
            &uri,
            client_capabilities(),
            Duration::from_millis(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Initialization(ref m) if m.contains("timed out")));
    }
}
