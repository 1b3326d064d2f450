// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Typed failures surfaced by the engine.
//!
//! Every variant is distinguishable by pattern so callers can decide between
//! retrying, aborting, or surfacing the failure without inspecting message text.

use std::time::Duration;

use crate::lsp::protocol::RequestId;
use crate::lsp::state::LifecycleState;

/// Result alias used throughout the library.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// A feature the query façade may ask the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `textDocument/definition`
    Definition,
    /// `textDocument/hover`
    Hover,
    /// `textDocument/documentSymbol`
    DocumentSymbols,
    /// `textDocument/rename`
    Rename,
    /// `workspace/symbol`
    WorkspaceSymbols,
}

impl Feature {
    /// The LSP method that implements this feature.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Definition => "textDocument/definition",
            Self::Hover => "textDocument/hover",
            Self::DocumentSymbols => "textDocument/documentSymbol",
            Self::Rename => "textDocument/rename",
            Self::WorkspaceSymbols => "workspace/symbol",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The server executable could not be found or spawned.
    #[error("failed to launch language server '{command}': {reason}")]
    Launch {
        /// The command that was launched.
        command: String,
        /// Why the launch failed.
        reason: String,
    },

    /// A malformed frame or an unmatched response id.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server process exited while the session was live.
    #[error("language server exited unexpectedly{}", status.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    ServerCrashed {
        /// Exit status, when it could be observed.
        status: Option<String>,
    },

    /// No response arrived before the deadline.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// The method that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The caller cancelled the request.
    #[error("request '{method}' (id {id}) was cancelled")]
    Cancelled {
        /// The method that was cancelled.
        method: String,
        /// The id of the cancelled request.
        id: RequestId,
    },

    /// The initialize handshake failed.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The server did not advertise the requested feature.
    #[error("language server does not support {0}")]
    UnsupportedCapability(Feature),

    /// A query targeted a document that was never opened.
    #[error("document is not open: {0}")]
    DocumentNotOpen(String),

    /// The file-content collaborator has nothing for this URI.
    #[error("no content for {uri}: {reason}")]
    NotFound {
        /// The URI that was looked up.
        uri: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// A query was issued before the session reached `Running`.
    #[error("session is not ready (state: {0:?})")]
    NotReady(LifecycleState),

    /// The session has been shut down.
    #[error("session is closed")]
    SessionClosed,

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// Writing to the server failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Params or results could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Returns true if the session cannot be used after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. }
                | Self::ServerCrashed { .. }
                | Self::Initialization(_)
                | Self::SessionClosed
                | Self::Transport(_)
        )
    }

    /// Returns true if repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = EngineError::Timeout {
            method: "textDocument/hover".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let crashed = EngineError::ServerCrashed { status: None };
        assert!(crashed.is_fatal());
        assert!(!crashed.is_retryable());

        let unsupported = EngineError::UnsupportedCapability(Feature::Rename);
        assert!(!unsupported.is_fatal());
        assert!(!unsupported.is_retryable());
    }

    #[test]
    fn test_display_names_the_method() {
        let err = EngineError::UnsupportedCapability(Feature::Rename);
        assert_eq!(
            err.to_string(),
            "language server does not support textDocument/rename"
        );

        let crashed = EngineError::ServerCrashed {
            status: Some("exit status: 1".to_string()),
        };
        assert_eq!(
            crashed.to_string(),
            "language server exited unexpectedly (exit status: 1)"
        );
    }
}
