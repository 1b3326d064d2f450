// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-conduit is a client engine for the Language Server Protocol.
//!
//! It launches one language server as a subprocess, speaks framed JSON-RPC
//! over its stdio, negotiates capabilities, keeps opened documents in sync
//! and exposes a small set of typed queries through [`Session`].

/// Engine tunables and their layered loading.
pub mod config;
/// Error taxonomy shared by every operation.
pub mod error;
/// Protocol plumbing: framing, process, correlation, capabilities, documents.
pub mod lsp;
/// The session façade and its query operations.
pub mod session;
/// Result types returned by queries and their mapping from raw JSON.
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Feature, Result};
pub use lsp::{
    CancelToken, ContentSource, FsContentSource, LifecycleState, RequestOptions,
    ServerLaunchSpec, SessionStatus, path_to_uri,
};
pub use session::Session;
pub use types::{HoverInfo, RenameEdits, Symbol, WorkspaceSymbolMatch};
