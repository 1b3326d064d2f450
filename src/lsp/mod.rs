// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Initialize handshake and server capability gating.
pub mod capabilities;
/// Request ids, pending requests, timeouts and cancellation.
pub mod correlator;
/// Open-document tracking and content sources.
pub mod documents;
/// Replies to server requests and handling of server notifications.
pub mod inbound;
/// Language server subprocess supervision.
pub mod process;
/// LSP message types and `Content-Length` framing.
pub mod protocol;
/// Lifecycle state machine and progress tracking.
pub mod state;

pub use capabilities::Capabilities;
pub use correlator::{CancelToken, Correlator, RequestOptions};
pub use documents::{ContentSource, DocumentSync, FsContentSource, path_to_uri};
pub use process::{ServerLaunchSpec, ServerProcess};
pub use protocol::{Message, RequestId};
pub use state::{LifecycleState, ProgressTracker, SessionStatus};
